//! Command handlers.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use tracing::warn;

use quickqr_core::auth::IdentityOutcome;
use quickqr_core::models::{
    AiSuggestionRequest, ContactField, ContactQrRequest, ContentGenerationRequest,
    ErrorCorrectionLevel, FieldVisibility, GenerateLostAndFoundRequest, MarkFoundRequest,
    PdfLinkQrRequest, QrCodeRequest, QrCodeResponse, QrCodeType, UpdateQrDetailsRequest,
};
use quickqr_core::navigation::{Navigator, LOGIN_PATH};
use quickqr_core::ApiError;

use super::{AiCommand, App, Command, LogsCommand, LostFoundCommand, QrCommand, QrStyle, UpdateArgs};

/// Password source for non-interactive use
const PASSWORD_ENV: &str = "QUICKQR_PASSWORD";

/// Target the identity sign-in "button" renders into
const IDENTITY_BUTTON_TARGET: &str = "terminal";

pub async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Login { username } => login(app, username).await,
        Command::LoginGoogle { id_token } => login_google(app, &id_token).await,
        Command::Register { email } => register(app, &email).await,
        Command::Logout => {
            app.api.logout();
            println!("Signed out.");
            Ok(())
        }
        Command::Status => {
            status(app);
            Ok(())
        }
        Command::Qr(qr) => generate_qr(app, qr).await,
        Command::UploadPdf { file } => upload_pdf(app, &file).await,
        Command::Ai(ai) => run_ai(app, ai).await,
        Command::LostFound(cmd) => run_lost_found(app, cmd).await,
        Command::Logs(cmd) => {
            run_logs(app, cmd);
            Ok(())
        }
        Command::Health => health(app).await,
    }
}

/// Explain a failed API call, pointing at `login` when the session was rejected
fn api_failure(e: ApiError) -> anyhow::Error {
    if e.is_session_invalid() {
        anyhow::anyhow!("{e}\nYour session has ended. Run `quickqr login` to continue.")
    } else if e.is_network() {
        anyhow::anyhow!("{e}\nCheck your connection and the API URL.")
    } else {
        e.into()
    }
}

fn read_password() -> Result<String> {
    match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => Ok(password),
        _ => rpassword::prompt_password("Password: ").context("Failed to read password"),
    }
}

fn signed_in(app: &App) {
    println!("Signed in.");
    // The navigation controller has already moved to where the user left off
    if let Some(resume) = resume_hint(&app.navigator.current_path()) {
        println!("Continue with: {resume}");
    }
}

/// Signing in again while already signed in does not navigate, leaving the
/// location on the login entry point
fn resume_hint(current_path: &str) -> Option<&str> {
    (current_path != LOGIN_PATH).then_some(current_path)
}

async fn login(app: &App, username: Option<String>) -> Result<()> {
    let username = username
        .or_else(|| app.config.last_username.clone())
        .context("No username given. Use `quickqr login --username <email>`.")?;
    let password = read_password()?;

    app.api
        .login_with_password(&username, &password)
        .await
        .map_err(api_failure)?;

    if app.config.last_username.as_deref() != Some(username.as_str()) {
        let mut config = app.config.clone();
        config.last_username = Some(username);
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to remember username");
        }
    }

    signed_in(app);
    Ok(())
}

async fn login_google(app: &App, id_token: &str) -> Result<()> {
    if !app.identity.initialize(IDENTITY_BUTTON_TARGET) {
        anyhow::bail!("Google sign-in is not configured. Set QUICKQR_GOOGLE_CLIENT_ID.");
    }

    let mut outcomes = app.identity.subscribe();
    app.identity_widget.submit(id_token);

    match outcomes.recv().await.context("Sign-in did not complete")? {
        IdentityOutcome::SignedIn(_) => {
            signed_in(app);
            Ok(())
        }
        IdentityOutcome::Failed(message) => anyhow::bail!("Google sign-in failed: {message}"),
    }
}

async fn register(app: &App, email: &str) -> Result<()> {
    let password = read_password()?;
    app.api.register(email, &password).await.map_err(api_failure)?;
    println!("Account created.");
    signed_in(app);
    Ok(())
}

fn status(app: &App) {
    println!("API:       {}", app.api.base_url());
    println!("Storage:   {:?}", app.config.storage);
    if app.session.is_authenticated() {
        println!("Session:   signed in");
    } else {
        println!("Session:   signed out");
    }
    if let Some(path) = app.redirects.peek() {
        println!("Resume at: {path} (after login)");
    }
    if let Some(ref username) = app.config.last_username {
        println!("Username:  {username}");
    }
}

fn error_correction(style: &QrStyle) -> Result<ErrorCorrectionLevel> {
    style
        .error_correction
        .parse::<ErrorCorrectionLevel>()
        .map_err(anyhow::Error::msg)
}

fn write_image(response: &QrCodeResponse, out: &Path) -> Result<()> {
    let encoded = response
        .image_base64()
        .context("Response contained no QR image")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("QR image is not valid base64")?;
    std::fs::write(out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Saved {}", out.display());
    Ok(())
}

fn report_qr(response: &QrCodeResponse, out: Option<&Path>) -> Result<()> {
    if !response.success {
        anyhow::bail!(
            "QR generation failed: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(ref id) = response.qr_id {
        println!("QR id:    {id}");
    }
    if let Some(ref url) = response.view_url {
        println!("View URL: {url}");
    }
    match out {
        Some(path) => write_image(response, path),
        None => Ok(()),
    }
}

async fn generate_qr(app: &App, command: QrCommand) -> Result<()> {
    match command {
        QrCommand::Text { content, style } => {
            let mut request = QrCodeRequest::text(&content);
            request.error_correction = error_correction(&style)?;
            if let Some(size) = style.size {
                request.size = size;
            }
            let response = app.api.generate_qr(&request).await.map_err(api_failure)?;
            report_qr(&response, style.out.as_deref())
        }
        QrCommand::Contact {
            name,
            phone,
            address,
            email,
            company,
            website,
            style,
        } => {
            let mut request = ContactQrRequest::new(&name, &phone, &address);
            request.email = email.map(ContactField::shown);
            request.company = company.map(ContactField::shown);
            request.website = website.map(ContactField::shown);
            request.error_correction = error_correction(&style)?;
            if let Some(size) = style.size {
                request.size = size;
            }
            let response = app
                .api
                .generate_contact_qr(&request)
                .await
                .map_err(api_failure)?;
            report_qr(&response, style.out.as_deref())
        }
        QrCommand::PdfLink { pdf_path, style } => {
            let mut request = PdfLinkQrRequest::new(pdf_path);
            request.error_correction = error_correction(&style)?;
            if let Some(size) = style.size {
                request.size = size;
            }
            let response = app
                .api
                .generate_pdf_link_qr(&request)
                .await
                .map_err(api_failure)?;
            report_qr(&response, style.out.as_deref())
        }
    }
}

async fn upload_pdf(app: &App, file: &Path) -> Result<()> {
    let contents =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf");

    let uploaded = app
        .api
        .upload_pdf(file_name, contents)
        .await
        .map_err(api_failure)?;
    println!("Uploaded: {}", uploaded.path);
    println!("Create a QR code with: quickqr qr pdf-link {}", uploaded.path);
    Ok(())
}

fn parse_qr_type(value: &str) -> Result<QrCodeType> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .with_context(|| format!("Unknown QR type: {value}"))
}

async fn run_ai(app: &App, command: AiCommand) -> Result<()> {
    match command {
        AiCommand::Suggest {
            content,
            qr_type,
            context,
        } => {
            let request = AiSuggestionRequest {
                content,
                qr_type: parse_qr_type(&qr_type)?,
                context,
            };
            let response = app.api.ai_suggestions(&request).await.map_err(api_failure)?;
            for suggestion in &response.suggestions {
                println!("- {suggestion}");
            }
            if let Some(ref optimized) = response.optimized_content {
                println!("Optimized: {optimized}");
            }
            println!("Confidence: {:.2}", response.confidence_score);
        }
        AiCommand::Generate {
            prompt,
            include_images,
        } => {
            let request = ContentGenerationRequest::new(&prompt, include_images);
            let response = app.api.generate_content(&request).await.map_err(api_failure)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

fn update_request(args: UpdateArgs) -> UpdateQrDetailsRequest {
    let permissions = if args.hidden.is_empty() {
        None
    } else {
        Some(
            args.hidden
                .into_iter()
                .map(|field| (field, FieldVisibility::Hidden))
                .collect::<BTreeMap<_, _>>(),
        )
    };

    UpdateQrDetailsRequest {
        qr_id: args.qr_id,
        user_id: args.user_id,
        first_name: args.first_name,
        last_name: args.last_name,
        phone_number: args.phone,
        email: args.email,
        address: args.address,
        address_location: args.address_location,
        description: args.description,
        item_type: args.item_type,
        permissions,
        lock: args.lock.then_some(true),
    }
}

fn parse_found_date(value: Option<&str>) -> Result<DateTime<Utc>> {
    match value {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid date: {raw}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

async fn run_lost_found(app: &App, command: LostFoundCommand) -> Result<()> {
    match command {
        LostFoundCommand::Generate { name, out } => {
            let request = GenerateLostAndFoundRequest::new(&name);
            let response = app
                .api
                .generate_lost_and_found_qr(&request)
                .await
                .map_err(api_failure)?;
            report_qr(&response, out.as_deref())?;
        }
        LostFoundCommand::Update(args) => {
            let response = app
                .api
                .update_qr_details(&update_request(args))
                .await
                .map_err(api_failure)?;
            println!(
                "{}",
                response.message.as_deref().unwrap_or(if response.success {
                    "Details saved."
                } else {
                    "Details not saved."
                })
            );
        }
        LostFoundCommand::Get { qr_id, user_id } => {
            let view = app
                .api
                .get_lost_and_found_qr(&qr_id, &user_id)
                .await
                .map_err(api_failure)?;
            if let Some(ref name) = view.qr_name {
                println!("Name:       {name}");
            }
            println!("First scan: {}", view.is_first_scan);
            println!("Has details: {}", view.has_details);
            println!("Can edit:   {}", view.can_edit);
            if let Some(ref message) = view.message {
                println!("{message}");
            }
            if let Some(ref details) = view.details {
                println!("{}", serde_json::to_string_pretty(details)?);
            }
        }
        LostFoundCommand::MarkFound {
            qr_id,
            user_id,
            location,
            date,
        } => {
            let request = MarkFoundRequest {
                qr_id,
                user_id,
                found_location: location,
                found_date: parse_found_date(date.as_deref())?,
            };
            let response = app.api.mark_item_found(&request).await.map_err(api_failure)?;
            println!(
                "{}",
                response.message.as_deref().unwrap_or("Owner notified.")
            );
        }
        LostFoundCommand::List { user_id } => {
            let qrs = app.api.user_qrs(&user_id).await.map_err(api_failure)?;
            println!("{}", serde_json::to_string_pretty(&qrs)?);
        }
    }
    Ok(())
}

fn run_logs(app: &App, command: LogsCommand) {
    let log = app.api.api_log();
    match command {
        LogsCommand::Show { limit } => {
            let entries = log.entries();
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            for entry in entries.iter().skip(skip) {
                let mut line = format!(
                    "{} {:?} [{}] {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.level,
                    entry.action,
                    entry.message
                );
                if let Some(ref error) = entry.error {
                    line.push_str(&format!(" - {error}"));
                }
                println!("{line}");
            }
        }
        LogsCommand::Clear => {
            log.clear();
            println!("API log cleared.");
        }
    }
}

async fn health(app: &App) -> Result<()> {
    let api = app.api.health().await.map_err(api_failure)?;
    println!("API: {}", serde_json::to_string(&api)?);
    match app.api.ai_health().await {
        Ok(ai) => println!("AI:  {}", serde_json::to_string(&ai)?),
        Err(e) => println!("AI:  unavailable ({e})"),
    }
    Ok(())
}
