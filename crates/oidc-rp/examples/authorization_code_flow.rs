//! OpenID Connect Authorization Code Flow
//!
//! Runs one login against a real provider from the terminal.
//!
//! ```text
//! OIDC_ISSUER=https://accounts.google.com \
//! OIDC_CLIENT_ID=... OIDC_CLIENT_SECRET=... \
//! OIDC_REDIRECT_URI=https://localhost:8443/auth/oidc/callback \
//! cargo run --example authorization_code_flow
//! ```
//!
//! Flow:
//! 1. The relying party resolves the provider and prints the authorization URL
//! 2. The user signs in; the browser lands on the redirect URI
//! 3. The full callback URL is pasted back into the terminal
//! 4. The code is exchanged, the ID token verified and the identity printed

use std::env;
use std::io::{self, BufRead, Write};

use oidc_rp::{CallbackParameters, MemorySession, OidcConfig, RelyingParty};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oidc_rp=info")),
        )
        .init();

    let config = OidcConfig::new(
        env::var("OIDC_ISSUER")?,
        env::var("OIDC_CLIENT_ID")?,
        env::var("OIDC_REDIRECT_URI")?,
    )
    .with_client_secret(env::var("OIDC_CLIENT_SECRET").unwrap_or_default())
    .with_scopes(["openid", "email", "profile"]);

    let rp = RelyingParty::new(config)?;
    let mut session = MemorySession::new();

    println!("=== OpenID Connect Authorization Code Flow ===\n");

    let redirect = rp.authorize(&mut session).await?;
    println!("1. Open this URL in a browser:");
    println!("   {}\n", redirect.url());

    print!("2. Paste the URL the provider redirected to: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let query = url::Url::parse(line.trim())?
        .query()
        .unwrap_or_default()
        .to_string();
    let params = CallbackParameters::from_query(&query);

    match rp.callback(&params, &mut session).await {
        Ok(outcome) => match outcome.identity() {
            Some(identity) => {
                println!("\n3. Signed in as {}\n", identity.uid);
                println!("{}", serde_json::to_string_pretty(&identity.info)?);
            }
            None => println!("\n3. 401 Unauthorized: the state did not match"),
        },
        Err(failure) => {
            println!("\n3. Login failed ({}): {}", failure.kind, failure.error);
        }
    }

    Ok(())
}
