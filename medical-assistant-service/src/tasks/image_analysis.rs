use anyhow::anyhow;
use tracing::info;

use crate::llm::{ImageInput, LlmClient};
use crate::storage::{ObjectLocation, ObjectStore};

/// Download an attached image and have the vision model describe it.
pub async fn analyze_image(
    objects: &dyn ObjectStore,
    llm: &dyn LlmClient,
    vision_model: &str,
    image_url: &str,
) -> anyhow::Result<String> {
    let location = ObjectLocation::from_public_url(image_url)
        .ok_or_else(|| anyhow!("not a public storage URL: {}", image_url))?;

    info!(
        bucket = %location.bucket,
        path = %location.path,
        "Fetching image for analysis"
    );
    let bytes = objects.download(&location).await?;
    let image = sniff_image(bytes)?;

    let prompt = image_analysis_prompt(image_url);
    llm.describe_image(vision_model, &prompt, &image).await
}

/// Reject downloads that are not a recognisable image format.
fn sniff_image(bytes: Vec<u8>) -> anyhow::Result<ImageInput> {
    let format = image::guess_format(&bytes)
        .map_err(|e| anyhow!("downloaded object is not an image: {}", e))?;
    Ok(ImageInput {
        mime_type: format.to_mime_type(),
        bytes,
    })
}

fn image_analysis_prompt(image_url: &str) -> String {
    format!(
        r#"You are a medical image analysis assistant.
        Analyze this medical image and provide key medical observations,
        potential findings, and relevant medical context that would be
        helpful for a medical professional. Be specific and concise.

        Image URL: {image_url}"#
    )
}

/// Prompt block presenting the image findings to the model.
pub fn image_analysis_block(analysis: &str) -> String {
    format!(
        "\nCURRENT IMAGE ANALYSIS:\n{analysis}\nConsider these current findings in your response.\n"
    )
}
