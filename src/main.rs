#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{anyhow, bail, Context, Result};
use caredata_session::{
    authentication::{AuthenticationServiceFactory, SessionServices},
    flows::{ConfirmationOutcome, LoginForm, LoginOutcome, RegisterForm, RegisterOutcome},
    identity::ResendOutcome,
    models::{ChallengeState, UserState},
    navigation::{Location, MemoryNavigator},
    settings::CareDataSettings,
    validation::OAuthErrorBanner,
};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "caredata-session", version, about = "CareData Portal session and sign-in tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show whether a session is stored and who it belongs to
    Status,
    /// Sign in with email and password
    Login {
        email: String,
        password: String,
        /// Remember the email for next time
        #[arg(long)]
        remember: bool,
    },
    /// Create an account
    Register {
        email: String,
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
    },
    /// Confirm an account with its emailed code, then sign in
    Confirm {
        email: String,
        password: String,
        code: String,
    },
    /// Ask the backend who the stored token belongs to
    Whoami,
    /// Sign out locally and with the identity service
    Logout,
    /// Print the hosted-UI URL for Google sign-in
    GoogleUrl {
        /// Ask Google which account to use
        #[arg(long)]
        select_account: bool,
        /// Wait for the callback URL on stdin and complete the sign-in
        #[arg(long)]
        wait: bool,
    },
    /// Complete a hosted-UI sign-in from the callback URL
    Callback { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = CareDataSettings::load().context("Failed to load settings")?;
    let navigator = Arc::new(MemoryNavigator::new("/"));
    let services = AuthenticationServiceFactory::create_default(&settings, navigator.clone())
        .context("Failed to initialise session services")?;

    match cli.command {
        Command::Status => status(&services).await,
        Command::Login { email, password, remember } => {
            let form = LoginForm::new(email, password).remember(remember);
            match services.login_flow().submit(&form).await {
                LoginOutcome::Redirect(path) => signed_in(&services, &path),
                LoginOutcome::Challenge(challenge) => {
                    complete_challenge(&services, &challenge).await
                }
                LoginOutcome::Error(e) => bail!(e.message),
            }
        }
        Command::Register { email, password, first_name, last_name } => {
            let form = RegisterForm {
                first_name,
                last_name,
                email,
                confirm_password: password.clone(),
                password,
            };
            match services.register_flow().submit(&form).await {
                RegisterOutcome::Redirect(path) if path == settings.session.sign_in_path => {
                    println!("✅ Registration successful, you can now sign in");
                    Ok(())
                }
                RegisterOutcome::Redirect(path) => signed_in(&services, &path),
                RegisterOutcome::Challenge(challenge) => {
                    complete_challenge(&services, &challenge).await
                }
                RegisterOutcome::Error(e) => bail!(e.message),
            }
        }
        Command::Confirm { email, password, code } => {
            let form = LoginForm::new(email, password);
            match services.login_flow().submit(&form).await {
                LoginOutcome::Redirect(path) => signed_in(&services, &path),
                LoginOutcome::Challenge(_) => submit_code(&services, &code).await,
                LoginOutcome::Error(e) => bail!(e.message),
            }
        }
        Command::Whoami => {
            let profile = services.api.me().await?;
            println!("{} <{}>", profile.display_name(), profile.email.unwrap_or_default());
            Ok(())
        }
        Command::Logout => {
            services.sign_out().await;
            println!("👋 Signed out");
            Ok(())
        }
        Command::GoogleUrl { select_account, wait } => {
            let url = services
                .login_flow()
                .begin_google_sign_in(navigator.as_ref(), select_account)
                .map_err(|e| anyhow!(e.message))?;
            println!("{url}");
            if wait {
                let callback = prompt("Paste the callback URL")?;
                complete_callback(&services, &callback).await?;
            }
            Ok(())
        }
        Command::Callback { url } => complete_callback(&services, &url).await,
    }
}

async fn status(services: &SessionServices) -> Result<()> {
    println!("Token stored: {}", services.store.get_token().is_some());
    match services.store.get_cached_profile() {
        Some(profile) => println!("Cached profile: {}", profile.display_name()),
        None => println!("Cached profile: none"),
    }
    match services.reconciler.reconcile_once().await {
        UserState::SignedIn { profile, source } => {
            println!("Signed in as {} ({source:?})", profile.display_name());
        }
        _ => println!("Signed out"),
    }
    Ok(())
}

fn signed_in(services: &SessionServices, path: &str) -> Result<()> {
    let name = services
        .store
        .get_cached_profile()
        .map(|p| p.display_name())
        .unwrap_or_default();
    println!("✅ Signed in as {name}; continue to {path}");
    Ok(())
}

/// Prompt for codes until the challenge resolves; `resend` asks for a new code
async fn complete_challenge(services: &SessionServices, challenge: &ChallengeState) -> Result<()> {
    println!("A verification code was sent to {}", challenge.identifier);
    loop {
        let input = prompt("Code (or 'resend')")?;
        if input == "resend" {
            let flow = services
                .confirmation_flow()
                .ok_or_else(|| anyhow!("Verification is not available"))?;
            match flow.resend().await.map_err(|e| anyhow!(e.message))? {
                ResendOutcome::Sent => println!("📨 New code sent"),
                ResendOutcome::CoolingDown { remaining } => {
                    println!("Please wait {}s before asking again", remaining.as_secs());
                }
            }
            continue;
        }
        match submit_code(services, &input).await {
            Ok(()) => return Ok(()),
            Err(e) if services.identity.as_ref().and_then(|i| i.pending_challenge()).is_some() => {
                println!("{e}");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn submit_code(services: &SessionServices, code: &str) -> Result<()> {
    let flow = services
        .confirmation_flow()
        .ok_or_else(|| anyhow!("Verification is not available"))?;
    match flow.submit(code).await {
        ConfirmationOutcome::Redirect(path) if path == services.settings.session.sign_in_path => {
            println!("✅ Account confirmed, please sign in");
            Ok(())
        }
        ConfirmationOutcome::Redirect(path) => signed_in(services, &path),
        ConfirmationOutcome::Pending(challenge) => {
            let reason = challenge.error.map_or("The code was not accepted", |e| e.message());
            bail!(reason)
        }
        ConfirmationOutcome::Error(e) => bail!(e.message),
    }
}

async fn complete_callback(services: &SessionServices, url: &str) -> Result<()> {
    let location = Location::parse(url);
    if let Some(banner) = OAuthErrorBanner::from_location(&location) {
        bail!("{}\n{}", banner.title(), banner.help());
    }
    if services.identity.is_none() {
        bail!("Cognito sign-in is not enabled");
    }

    let handle = services.reconciler.mount(location);
    let mut state = handle.state();
    let window = services.settings.session.callback_watch_window();
    let settled = tokio::time::timeout(window, state.wait_for(UserState::is_signed_in)).await;
    match settled {
        Ok(Ok(user)) => {
            let name = user
                .profile()
                .map(caredata_session::UserProfile::display_name)
                .unwrap_or_default();
            println!("✅ Signed in as {name}");
            Ok(())
        }
        _ => bail!("Google sign-in did not complete"),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
