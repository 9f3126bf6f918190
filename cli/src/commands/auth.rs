use anyhow::{Result, bail};
use chrono::{Duration, Utc};

use aura_core::models::Session;
use aura_core::service::AuraService;

use super::helpers::{print_json, prompt_line};
use crate::supabase::SupabaseClient;

pub(crate) struct LoginArgs {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub expires_in: Option<i64>,
    pub email: Option<String>,
    pub password: Option<String>,
}

pub(crate) async fn cmd_login(
    service: &AuraService,
    supabase: Option<&SupabaseClient>,
    args: LoginArgs,
    json: bool,
) -> Result<()> {
    let session = if let Some(token) = args.token {
        Session {
            access_token: token,
            user_id: args.user_id,
            expires_at: args.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
        }
    } else if let Some(email) = args.email {
        let Some(client) = supabase else {
            bail!("Password sign-in needs --supabase-url and --anon-key");
        };
        let password = match args.password {
            Some(p) => p,
            None => prompt_line("Password")?,
        };
        client.sign_in(&email, &password).await?
    } else {
        bail!("Pass --token, or --email to sign in with a password");
    };

    service.save_session(&session)?;

    if json {
        print_json(&serde_json::json!({
            "signed_in": true,
            "user_id": session.user_id,
            "expires_at": session.expires_at,
        }))?;
    } else {
        match &session.user_id {
            Some(id) => println!("Signed in as {id}"),
            None => println!("Signed in"),
        }
        if let Some(exp) = session.expires_at {
            println!("  Token expires {}", exp.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    Ok(())
}

pub(crate) fn cmd_logout(service: &AuraService, json: bool) -> Result<()> {
    let removed = service.clear_session()?;
    if json {
        print_json(&serde_json::json!({ "signed_out": removed }))?;
    } else if removed {
        println!("Signed out");
    } else {
        eprintln!("No session to clear");
    }
    Ok(())
}

pub(crate) fn cmd_flags(service: &AuraService, premium: Option<bool>, json: bool) -> Result<()> {
    let mut flags = service.feature_flags()?;
    if let Some(p) = premium {
        flags.premium = p;
        service.set_feature_flags(&flags)?;
    }
    if json {
        print_json(&flags)?;
    } else {
        println!("premium: {}", if flags.premium { "on" } else { "off" });
    }
    Ok(())
}
