//! Download whisper.cpp ggml models from Hugging Face.

use log::info;
use std::io::Write;
use std::path::{Path, PathBuf};

const HF_REPO: &str = "ggerganov/whisper.cpp";

/// Model source: (model_id, hf_filename). Files keep their upstream name locally.
pub const MODEL_SOURCES: &[(&str, &str)] = &[
    ("tiny.en", "ggml-tiny.en.bin"),
    ("tiny", "ggml-tiny.bin"),
    ("base.en", "ggml-base.en.bin"),
    ("base", "ggml-base.bin"),
    ("small.en", "ggml-small.en.bin"),
    ("small", "ggml-small.bin"),
    ("medium.en", "ggml-medium.en.bin"),
    ("medium", "ggml-medium.bin"),
    ("large-v3", "ggml-large-v3.bin"),
    ("large-v3-turbo", "ggml-large-v3-turbo.bin"),
];

/// Short names accepted for convenience.
const MODEL_ALIASES: &[(&str, &str)] = &[("large", "large-v3"), ("turbo", "large-v3-turbo")];

/// Map a requested model name (or alias) to its canonical id.
pub fn canonical_model_name(model_name: &str) -> Option<&'static str> {
    let name = model_name.trim();
    let name = MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, target)| *target);
    MODEL_SOURCES
        .iter()
        .find(|(id, _)| *id == name)
        .map(|(id, _)| *id)
}

fn source_filename(model_name: &str) -> Option<&'static str> {
    let id = canonical_model_name(model_name)?;
    MODEL_SOURCES
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, file)| *file)
}

/// Download with progress callback. Callback receives (bytes_downloaded, total_bytes).
/// total_bytes is None if Content-Length header is missing.
pub async fn download_model_with_progress<F>(
    models_dir: &Path,
    model_name: &str,
    mut on_progress: F,
) -> Result<PathBuf, String>
where
    F: FnMut(u64, Option<u64>) + Send,
{
    use futures_util::StreamExt;

    let filename = source_filename(model_name).ok_or_else(|| {
        format!(
            "Unknown model: {}. Available: {:?}",
            model_name,
            MODEL_SOURCES.iter().map(|(id, _)| *id).collect::<Vec<_>>()
        )
    })?;

    let output_path = models_dir.join(filename);
    if output_path.exists() {
        return Ok(output_path);
    }
    std::fs::create_dir_all(models_dir).map_err(|e| e.to_string())?;

    let url = format!("https://huggingface.co/{}/resolve/main/{}", HF_REPO, filename);
    info!("[models] downloading {} from {}", model_name, url);
    let response = reqwest::get(&url).await.map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("Download failed: {}", response.status()));
    }

    let total_bytes = response.content_length();
    let mut stream = response.bytes_stream();
    // Write beside the final name so an interrupted download is never mistaken for a model.
    let part_path = output_path.with_extension("bin.part");
    let mut file = std::fs::File::create(&part_path).map_err(|e| e.to_string())?;
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| e.to_string())?;
        file.write_all(&bytes).map_err(|e| e.to_string())?;
        downloaded += bytes.len() as u64;
        on_progress(downloaded, total_bytes);
    }
    file.flush().map_err(|e| e.to_string())?;
    drop(file);
    std::fs::rename(&part_path, &output_path).map_err(|e| e.to_string())?;

    Ok(output_path)
}

/// Resolve model name (e.g. "base.en", "tiny", "turbo") to full path if the model file exists.
pub fn resolve_model_path(models_dir: &Path, model_name: &str) -> Option<PathBuf> {
    let path = models_dir.join(source_filename(model_name)?);
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

/// List model names for .bin files that exist in models_dir and match known MODEL_SOURCES.
pub fn list_installed_model_names(models_dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(entries) = std::fs::read_dir(models_dir) else {
        return names;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(false, |e| e == "bin") {
            if let Some(name) = path.file_name().and_then(|f| f.to_str()) {
                if let Some((model_id, _)) = MODEL_SOURCES.iter().find(|(_, file)| *file == name) {
                    names.push((*model_id).to_string());
                }
            }
        }
    }
    names.sort();
    names
}
