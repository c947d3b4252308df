//! Booking commands.

use chrono::{DateTime, Utc};
use clap::Subcommand;
use console::style;
use uuid::Uuid;

use mkt_core::error::MktResult;
use mkt_models::{Booking, BookingStatus};
use mkt_services::booking::transitions_from;
use mkt_services::{ActorRole, BookingDraft, Session, TransitionRequest};

use super::Context;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum BookingsAction {
    /// Book a provider (as a customer).
    Create {
        /// Provider user id.
        #[arg(short, long)]
        provider: Uuid,
        /// When the job is scheduled (RFC 3339, e.g. 2026-11-02T09:00:00Z).
        #[arg(short = 't', long = "at")]
        scheduled_at: DateTime<Utc>,
        /// Service id from the provider's catalogue.
        #[arg(long)]
        service: Option<Uuid>,
        /// Job address.
        #[arg(short, long)]
        address: Option<String>,
        /// What needs doing.
        #[arg(short, long)]
        description: Option<String>,
        /// Agreed price in cents.
        #[arg(long)]
        price_cents: Option<i64>,
    },
    /// List your bookings, split into active and past.
    List {
        /// Only bookings where you are this party.
        #[arg(long = "as")]
        as_role: Option<ActorRole>,
    },
    /// Show one booking and the moves available to you.
    Show {
        /// Booking id.
        id: Uuid,
    },
    /// Move a booking to a new status.
    Transition {
        /// Booking id.
        id: Uuid,
        /// Target status (accepted, declined, completed, cancelled).
        target: BookingStatus,
        /// Which party you act as.
        #[arg(long = "as")]
        actor: ActorRole,
        /// Status you last saw; the move fails if it has changed since.
        #[arg(short, long)]
        expect: Option<BookingStatus>,
    },
}

pub async fn run(ctx: &Context, action: BookingsAction) -> MktResult<()> {
    let session = ctx.session().await?;
    let bookings = &ctx.registry.bookings;

    match action {
        BookingsAction::Create {
            provider,
            scheduled_at,
            service,
            address,
            description,
            price_cents,
        } => {
            let booking = bookings
                .create_booking(
                    &session,
                    BookingDraft {
                        provider_id: provider,
                        service_id: service,
                        scheduled_at,
                        address,
                        description,
                        total_price_cents: price_cents,
                    },
                )
                .await?;
            match ctx.format {
                OutputFormat::Json => super::print_json(&booking)?,
                OutputFormat::Text => {
                    println!("{} booking {}", style("Requested").green().bold(), booking.id);
                    print_booking(ctx, &booking).await;
                }
            }
        }
        BookingsAction::List { as_role } => {
            let buckets = bookings.list_for_session(&session, as_role).await?;
            match ctx.format {
                OutputFormat::Json => super::print_json(&buckets)?,
                OutputFormat::Text => {
                    if buckets.active.is_empty() && buckets.past.is_empty() {
                        println!("No bookings found.");
                    } else {
                        print_bucket(ctx, &session, "Active", &buckets.active).await;
                        print_bucket(ctx, &session, "Past", &buckets.past).await;
                    }
                }
            }
        }
        BookingsAction::Show { id } => {
            let booking = bookings.get(&session, id).await?;
            let moves: Vec<(BookingStatus, ActorRole)> = transitions_from(booking.status)
                .into_iter()
                .filter(|(_, actor)| actor.party(&booking) == session.user_id())
                .collect();

            match ctx.format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "booking": booking,
                    "available": moves
                        .iter()
                        .map(|(to, actor)| serde_json::json!({ "to": to, "as": actor }))
                        .collect::<Vec<_>>(),
                }))?,
                OutputFormat::Text => {
                    print_booking(ctx, &booking).await;
                    if moves.is_empty() {
                        println!("  No moves available to you.");
                    } else {
                        for (to, actor) in moves {
                            println!(
                                "  {} marketplace bookings transition {} {to} --as {actor} --expect {}",
                                style("->").dim(),
                                booking.id,
                                booking.status
                            );
                        }
                    }
                }
            }
        }
        BookingsAction::Transition {
            id,
            target,
            actor,
            expect,
        } => {
            let mut request = TransitionRequest::new(id, actor, target);
            if let Some(observed) = expect {
                request = request.expecting(observed);
            }
            let booking = bookings.request_transition(&session, request).await?;
            match ctx.format {
                OutputFormat::Json => super::print_json(&booking)?,
                OutputFormat::Text => {
                    println!(
                        "Booking {} is now {}",
                        booking.id,
                        super::styled_status(booking.status)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn print_bucket(ctx: &Context, session: &Session, title: &str, bookings: &[Booking]) {
    if bookings.is_empty() {
        return;
    }
    let mut table = super::new_table();
    table.set_header(vec!["Id", "Status", "Scheduled", "With", "Price", "Description"]);
    for b in bookings {
        let counterpart = if b.customer_id == session.user_id() {
            b.provider_id
        } else {
            b.customer_id
        };
        table.add_row(vec![
            super::short_id(b.id),
            super::styled_status(b.status).to_string(),
            b.scheduled_at.format("%Y-%m-%d %H:%M").to_string(),
            ctx.name_of(counterpart).await,
            super::format_price(b.total_price_cents),
            super::truncate(b.description.as_deref().unwrap_or("-"), 40),
        ]);
    }
    println!("{}", style(title).bold());
    println!("{table}");
}

async fn print_booking(ctx: &Context, b: &Booking) {
    println!("{}  {}", style(b.id).bold(), super::styled_status(b.status));
    println!("  Customer:  {}", ctx.name_of(b.customer_id).await);
    println!("  Provider:  {}", ctx.name_of(b.provider_id).await);
    println!("  Scheduled: {}", b.scheduled_at.to_rfc3339());
    println!("  Address:   {}", b.address.as_deref().unwrap_or("-"));
    println!("  Details:   {}", b.description.as_deref().unwrap_or("-"));
    println!("  Price:     {}", super::format_price(b.total_price_cents));
}
