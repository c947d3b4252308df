//! Review commands.

use clap::Subcommand;
use console::style;
use uuid::Uuid;

use mkt_core::error::MktResult;
use mkt_models::Review;

use super::Context;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ReviewsAction {
    /// Review a completed booking (as its customer).
    Submit {
        /// Booking id.
        booking: Uuid,
        /// Rating from 1 to 5.
        rating: i64,
        /// Optional comment.
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Show the review for a booking, or whether you can write one.
    Show {
        /// Booking id.
        booking: Uuid,
    },
}

pub async fn run(ctx: &Context, action: ReviewsAction) -> MktResult<()> {
    let session = ctx.session().await?;
    let reviews = &ctx.registry.reviews;

    match action {
        ReviewsAction::Submit {
            booking,
            rating,
            comment,
        } => {
            let review = reviews
                .submit_review(&session, booking, rating, comment.as_deref())
                .await?;
            match ctx.format {
                OutputFormat::Json => super::print_json(&review)?,
                OutputFormat::Text => {
                    println!("{} Thanks for your review.", style("Saved.").green().bold());
                    print_review(&review);
                }
            }
        }
        ReviewsAction::Show { booking } => {
            let eligibility = reviews.eligibility(&session, booking).await?;
            let existing = reviews.existing_review(&session, booking).await?;
            match ctx.format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "review": existing,
                    "eligibility": eligibility,
                }))?,
                OutputFormat::Text => match existing {
                    Some(review) => print_review(&review),
                    None if eligibility.is_eligible() => {
                        println!("No review yet. You can review this booking.");
                    }
                    None => println!("No review yet. {}", eligibility.reason()),
                },
            }
        }
    }
    Ok(())
}

fn print_review(review: &Review) {
    let filled = usize::try_from(review.rating).unwrap_or(0);
    let stars = format!("{}{}", "*".repeat(filled), "-".repeat(5usize.saturating_sub(filled)));
    println!("  {}  {}/5", style(stars).yellow(), review.rating);
    if let Some(comment) = &review.comment {
        println!("  \"{comment}\"");
    }
    println!("  {}", style(review.created_at.format("%Y-%m-%d")).dim());
}
