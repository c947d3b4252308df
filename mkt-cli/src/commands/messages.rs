//! Message commands.

use clap::Subcommand;
use console::style;
use uuid::Uuid;

use mkt_core::error::MktResult;

use super::Context;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum MessagesAction {
    /// Send a message.
    Send {
        /// Receiver user id.
        #[arg(short, long)]
        to: Uuid,
        /// Message text.
        text: String,
        /// Booking the message is about.
        #[arg(short, long)]
        booking: Option<Uuid>,
    },
    /// Open the thread with another user. Opening marks their messages read.
    Chat {
        /// Counterpart user id.
        with: Uuid,
        /// Send this message after opening.
        #[arg(short, long)]
        send: Option<String>,
        /// Booking a sent message is about.
        #[arg(short, long, requires = "send")]
        booking: Option<Uuid>,
    },
    /// List conversations with unread counts.
    Conversations,
}

pub async fn run(ctx: &Context, action: MessagesAction) -> MktResult<()> {
    let session = ctx.session().await?;

    match action {
        MessagesAction::Send { to, text, booking } => {
            let message = ctx.registry.messages.send(&session, to, &text, booking).await?;
            match ctx.format {
                OutputFormat::Json => super::print_json(&message)?,
                OutputFormat::Text => {
                    println!(
                        "{} to {}",
                        style("Sent").green().bold(),
                        ctx.name_of(message.receiver_id).await
                    );
                }
            }
        }
        MessagesAction::Chat {
            with,
            send,
            booking,
        } => {
            let mut chat = ctx.registry.open_chat(&session, with).await?;
            if let Some(text) = send {
                chat.send(&text, booking).await?;
            }
            let thread = chat.thread().to_vec();
            chat.close().await;

            match ctx.format {
                OutputFormat::Json => super::print_json(&thread)?,
                OutputFormat::Text => {
                    let them = ctx.name_of(with).await;
                    println!("{}", style(format!("Chat with {them}")).bold());
                    if thread.is_empty() {
                        println!("  No messages yet.");
                    }
                    for m in &thread {
                        let who = if m.sender_id == session.user_id() {
                            style("you".to_string()).cyan()
                        } else {
                            style(them.clone()).magenta()
                        };
                        let link = m
                            .booking_id
                            .map(|b| format!(" [booking {}]", super::short_id(b)))
                            .unwrap_or_default();
                        println!(
                            "  {} {}: {}{}",
                            style(m.created_at.format("%m-%d %H:%M")).dim(),
                            who,
                            m.content,
                            style(link).dim()
                        );
                    }
                }
            }
        }
        MessagesAction::Conversations => {
            let list = ctx.registry.open_conversation_list(&session).await?;
            let conversations = list.conversations().to_vec();
            let unread_total = list.view().unread_total();
            list.close().await;

            match ctx.format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "conversations": conversations,
                    "unread_total": unread_total,
                }))?,
                OutputFormat::Text => {
                    if conversations.is_empty() {
                        println!("No conversations yet.");
                        return Ok(());
                    }
                    let mut table = super::new_table();
                    table.set_header(vec!["With", "Id", "Last Message", "When", "Unread"]);
                    for c in &conversations {
                        let prefix = if c.last_message.sender_id == session.user_id() {
                            "You: "
                        } else {
                            ""
                        };
                        table.add_row(vec![
                            ctx.name_of(c.counterpart_id).await,
                            super::short_id(c.counterpart_id),
                            super::truncate(&format!("{prefix}{}", c.last_message.content), 40),
                            c.last_message.created_at.format("%Y-%m-%d %H:%M").to_string(),
                            c.badge_label().unwrap_or_else(|| "-".to_string()),
                        ]);
                    }
                    println!("{table}");
                    println!("\n{unread_total} unread");
                }
            }
        }
    }
    Ok(())
}
