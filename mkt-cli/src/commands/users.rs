//! User commands.

use clap::Subcommand;
use console::style;
use uuid::Uuid;

use mkt_core::error::{MktError, MktResult};
use mkt_models::{AppRole, IdentityDirectory};

use super::Context;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum UsersAction {
    /// Register a new user.
    Add {
        /// Full name.
        name: String,
        /// Role to grant (admin, customer, provider). Repeatable.
        #[arg(short, long = "role", required = true)]
        roles: Vec<AppRole>,
        /// Phone number.
        #[arg(long)]
        phone: Option<String>,
        /// City or area.
        #[arg(long)]
        location: Option<String>,
    },
    /// Show a user's profile and roles.
    Show {
        /// User id (defaults to --user).
        id: Option<Uuid>,
    },
}

pub async fn run(ctx: &Context, action: UsersAction) -> MktResult<()> {
    match action {
        UsersAction::Add {
            name,
            roles,
            phone,
            location,
        } => {
            let mut profile = ctx.store.register_user(&name, &roles)?;
            if phone.is_some() || location.is_some() {
                profile.phone = phone;
                profile.location = location;
                ctx.store.save_profile(&profile)?;
            }

            match ctx.format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "profile": profile,
                    "roles": roles,
                }))?,
                OutputFormat::Text => {
                    println!(
                        "{} {} ({})",
                        style("Registered").green().bold(),
                        profile.full_name,
                        profile.user_id
                    );
                    println!("  Use --user {} to act as this user.", profile.user_id);
                }
            }
        }
        UsersAction::Show { id } => {
            let user_id = match id {
                Some(id) => id,
                None => ctx.session().await?.user_id(),
            };
            let profile = ctx
                .store
                .fetch_profile(user_id)
                .await?
                .ok_or_else(|| MktError::NotFound(format!("user {user_id}")))?;
            let roles = ctx.store.fetch_roles(user_id).await?;

            match ctx.format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "profile": profile,
                    "roles": roles,
                }))?,
                OutputFormat::Text => {
                    let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
                    println!("{}", style(&profile.full_name).bold());
                    println!("  Id:       {}", profile.user_id);
                    println!("  Roles:    {}", roles.join(", "));
                    println!("  Phone:    {}", profile.phone.as_deref().unwrap_or("-"));
                    println!("  Location: {}", profile.location.as_deref().unwrap_or("-"));
                    println!("  Joined:   {}", profile.created_at.format("%Y-%m-%d"));
                }
            }
        }
    }
    Ok(())
}
