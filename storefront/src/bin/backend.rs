use std::error::Error;
use storefront::executable_utils::{initialize_executable, run_backend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = initialize_executable()?;
    run_backend(config).await
}
