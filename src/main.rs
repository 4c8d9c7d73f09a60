#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    env_logger::init();
    relay_im::rocket().launch().await?;
    Ok(())
}
