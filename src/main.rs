use anyhow::Result;
use std::sync::Arc;
use story2comic::core::config::Config;
use story2comic::core::io::NativeStorage;
use story2comic::services::image::create_image_client;
use story2comic::services::llm::create_llm;
use story2comic::services::workflow::ComicWorkflow;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with a gemini api_key.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let llm = create_llm(&config)?;
    let images = create_image_client(&config)?;
    let storage = Arc::new(NativeStorage::new());

    let mut workflow = ComicWorkflow::new(config, llm, images, storage).await?;
    let reports = workflow.run().await?;

    for report in &reports {
        if report.is_partial() {
            println!(
                "{}: {} (missing panels {:?})",
                report.story, report.bundle_path, report.missing_panels
            );
        } else {
            println!("{}: {}", report.story, report.bundle_path);
        }
    }

    Ok(())
}
