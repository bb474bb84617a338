#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rocket = mailkick_server::rocket()?;
    log::info!("Starting Mailkick server");

    let _ = rocket.launch().await?;
    Ok(())
}
