//! Identity command handlers

use anyhow::{anyhow, Result};

use pagelog_core::{bootstrap, issue_token, Config, LocalIdentityProvider, UserId};

use crate::output::{Output, OutputFormat};

/// Sign in the way a session would and return the resulting identity
async fn establish(config: &Config) -> Result<(LocalIdentityProvider, UserId)> {
    let provider = LocalIdentityProvider::from_config(config);
    let state = bootstrap(&provider, config.bootstrap_token.as_deref()).await;
    let user_id = state
        .user_id
        .ok_or_else(|| anyhow!("Could not establish an identity. Run with PAGELOG_LOG=debug for details."))?;
    Ok((provider, user_id))
}

/// Show the current user id
pub async fn show(config: &Config, output: &Output) -> Result<()> {
    let (provider, user_id) = establish(config).await?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "user_id": user_id,
                    "app_id": config.app_id,
                    "identity_file": provider.path(),
                })
            );
        }
        OutputFormat::Quiet => println!("{}", user_id),
        OutputFormat::Human => {
            println!();
            println!("User ID:       {}", user_id);
            println!("App ID:        {}", config.app_id);
            println!("Identity file: {}", provider.path().display());
            println!();
            println!("To use this identity on another device, run:");
            println!("  pagelog identity token");
        }
    }

    Ok(())
}

/// Print a bootstrap token for the current identity
pub async fn token(config: &Config, output: &Output) -> Result<()> {
    let (_, user_id) = establish(config).await?;
    let token = issue_token(&user_id);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({"user_id": user_id, "token": token})
            );
        }
        OutputFormat::Quiet => println!("{}", token),
        OutputFormat::Human => {
            println!();
            println!("Bootstrap token for {}:", user_id);
            println!();
            println!("  {}", token);
            println!();
            println!("On the other device, run:");
            println!("  pagelog config set bootstrap_token {}", token);
            println!("or set PAGELOG_TOKEN for a single run.");
        }
    }

    Ok(())
}
