//! Host command surface
//!
//! Maps an `{path, outputPath?, includeData?}` command onto one extraction
//! and shapes the reply the host hands back to its caller.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::{ExtractError, Result};
use crate::media::OutputCodec;
use crate::pipeline::{AudioExtractor, ExtractRequest};

const FILE_SCHEME: &str = "file://";

/// Prefix of generated output file names
const TEMP_PREFIX: &str = "afv_tmp_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractCommand {
    /// Local path or `file://` URI of the source media
    pub path: String,
    pub output_path: Option<PathBuf>,
    /// Inline the output as a data URL in the reply
    #[serde(default)]
    pub include_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractReply {
    pub path: PathBuf,
    pub mime_type: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
}

/// Turn a plain path or `file://` URI into an existing local file.
pub fn resolve_to_local_file(uri: &str) -> Result<PathBuf> {
    let path = match uri.strip_prefix(FILE_SCHEME) {
        Some(rest) => PathBuf::from(rest),
        None if uri.contains("://") => {
            return Err(ExtractError::InputNotFound(format!(
                "unsupported URI scheme: {}",
                uri
            )))
        }
        None => PathBuf::from(uri),
    };

    if !path.is_file() {
        return Err(ExtractError::InputNotFound(path.display().to_string()));
    }
    Ok(path)
}

/// `data:<mime>;base64,<payload>` for the file at `path`.
pub async fn build_data_url(path: &Path, mime_type: &str) -> Result<String> {
    let data = tokio::fs::read(path).await?;
    Ok(format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(data)
    ))
}

/// Rename `path` so its extension matches the codec behind `mime_type`.
///
/// Returns the path the file ends up at. A failed rename leaves the file
/// where it is.
pub fn rename_to_codec_extension(path: &Path, mime_type: &str) -> PathBuf {
    let codec = if mime_type == OutputCodec::Mp3.mime_type() {
        OutputCodec::Mp3
    } else {
        OutputCodec::Aac
    };
    let wanted = codec.extension().trim_start_matches('.');
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case(wanted)) {
        return path.to_path_buf();
    }

    let renamed = path.with_extension(wanted);
    match std::fs::rename(path, &renamed) {
        Ok(()) => {
            tracing::debug!(from = %path.display(), to = %renamed.display(), "Renamed output");
            renamed
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Rename to codec extension failed");
            path.to_path_buf()
        }
    }
}

/// `<scratch>/afv_tmp_<uuid>.tmp`
pub fn default_output_path(scratch_dir: &Path) -> PathBuf {
    scratch_dir.join(format!("{}{}.tmp", TEMP_PREFIX, uuid::Uuid::new_v4()))
}

/// Resolve the output path of a remote caller inside `scratch_dir`.
///
/// No request gets a generated name. A relative request is taken relative to
/// `scratch_dir`; any request whose parent directory does not resolve to
/// `scratch_dir` or below is rejected before anything touches the disk.
pub fn confine_output(scratch_dir: &Path, requested: Option<&Path>) -> Result<PathBuf> {
    let Some(requested) = requested else {
        return Ok(default_output_path(scratch_dir));
    };
    let rejected = || ExtractError::OutputNotAllowed(requested.display().to_string());

    let candidate = scratch_dir.join(requested);
    let Some(Component::Normal(file_name)) = candidate.components().next_back() else {
        return Err(rejected());
    };
    let parent = candidate.parent().ok_or_else(rejected)?;

    let scratch = scratch_dir.canonicalize()?;
    let parent = parent.canonicalize().map_err(|_| rejected())?;
    if !parent.starts_with(&scratch) {
        tracing::warn!(
            requested = %requested.display(),
            scratch = %scratch.display(),
            "Rejecting output path outside the scratch directory"
        );
        return Err(rejected());
    }
    Ok(parent.join(file_name))
}

/// Run one command to completion.
pub async fn run_command(extractor: &mut AudioExtractor, command: ExtractCommand) -> Result<ExtractReply> {
    let input = resolve_to_local_file(&command.path)?;
    let output = match command.output_path {
        Some(path) => path,
        None => default_output_path(&extractor.config().scratch_dir()),
    };

    let outcome = extractor.extract(ExtractRequest::new(input, output)).await?;
    let path = rename_to_codec_extension(&outcome.output_path, &outcome.codec_mime_type);

    let data_url = if command.include_data {
        Some(build_data_url(&path, &outcome.codec_mime_type).await?)
    } else {
        None
    };

    Ok(ExtractReply {
        path,
        mime_type: outcome.codec_mime_type,
        file_size: outcome.file_size_bytes,
        data_url,
    })
}
