use crate::job::JobStatus;
use crate::pipeline::types::Product;
use crate::web::api::{find_job, ApiError, ApiResult};
use crate::web::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Deserialize)]
pub struct DownloadQuery {
    /// Comma-separated products; all outputs when absent
    #[serde(default)]
    pub which: String,
    #[serde(default)]
    pub cleanup: Option<String>,
}

impl DownloadQuery {
    fn cleanup(&self) -> bool {
        matches!(self.cleanup.as_deref(), Some("1") | Some("true"))
    }

    /// Requested products, or `None` for every output. Unknown names are
    /// skipped.
    fn products(&self) -> Option<Vec<Product>> {
        let names: Vec<&str> = self
            .which
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            return None;
        }

        let mut products = Vec::new();
        for name in names {
            match name.parse::<Product>() {
                Ok(p) if !products.contains(&p) => products.push(p),
                Ok(_) => {}
                Err(_) => tracing::debug!("Ignoring unknown product {:?} in download", name),
            }
        }
        Some(products)
    }
}

fn zip_files(files: &[(String, Vec<u8>)]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in files {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Download one output as an attachment, or several as a zip.
///
/// Unknown product names and outputs whose file is gone are skipped; 404 only
/// when nothing is left. With `cleanup=1` the served files are deleted once
/// the body is ready.
pub async fn download_outputs(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let job = find_job(&state, id)?.snapshot();
    if job.status != JobStatus::Done || job.outputs.is_empty() {
        return Err(ApiError::NotFound(format!("job {} has no outputs", id)));
    }

    let selected: Vec<(Product, &String)> = match query.products() {
        None => job.outputs.iter().map(|(p, rel)| (*p, rel)).collect(),
        Some(products) => products
            .into_iter()
            .filter_map(|p| job.outputs.get(&p).map(|rel| (p, rel)))
            .collect(),
    };
    let media_root = state.registry.media_root();
    let mut files: Vec<(String, Vec<u8>)> = Vec::with_capacity(selected.len());
    let mut paths: Vec<PathBuf> = Vec::with_capacity(selected.len());
    for (product, rel) in &selected {
        let path = media_root.join(rel);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                files.push((product.file_name(), bytes));
                paths.push(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Skipping {} of job {}: file is gone", product, id);
            }
            Err(e) => {
                return Err(ApiError::Internal(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
    if files.is_empty() {
        return Err(ApiError::NotFound("no matching outputs".to_string()));
    }

    let response = if files.len() == 1 {
        let (name, bytes) = files.remove(0);
        let mime = mime_guess::from_path(&name).first_or_octet_stream().to_string();
        let disposition = format!("attachment; filename=\"{}\"", name);
        (
            [
                (header::CONTENT_TYPE, mime),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            bytes,
        )
            .into_response()
    } else {
        let archive = zip_files(&files).map_err(|e| ApiError::Internal(e.to_string()))?;
        (
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"job-{}-outputs.zip\"", id),
                ),
            ],
            archive,
        )
            .into_response()
    };

    if query.cleanup() {
        for path in &paths {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::debug!("Cleanup of {} failed: {}", path.display(), e);
            }
        }
    }

    Ok(response)
}
