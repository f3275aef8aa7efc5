// clustervault/src/backup/cloud.rs
use crate::catalog::BackupArtifact;
use crate::config::CloudConfig;
use crate::errors::{AppError, Result};
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;

/// Deterministic object key for an artifact: prefix + filename. Re-uploading
/// the same artifact overwrites the same key rather than duplicating it.
pub fn remote_key_for(artifact: &BackupArtifact, prefix: Option<&str>) -> String {
    let file_name = artifact
        .local_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match prefix {
        Some(prefix) if !prefix.is_empty() => {
            format!("{}/{}", prefix.trim_matches('/'), file_name)
        }
        _ => file_name,
    }
}

/// Uploads a finished local artifact to the configured object store.
///
/// Failures surface as `TransferFailed` and are non-fatal to the backup:
/// the artifact is complete once written locally, distributed once
/// uploaded. Retries are the caller's policy, not done here.
pub async fn upload_artifact(
    cloud_config: &CloudConfig,
    artifact: &BackupArtifact,
) -> Result<String> {
    let key = remote_key_for(artifact, cloud_config.folder_prefix.as_deref());

    println!(
        "☁ Uploading {} to {:?} bucket {} with key {}",
        artifact.local_path.display(),
        cloud_config.provider,
        cloud_config.bucket_name,
        key
    );

    let mut sdk_config_builder = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .region(Region::new(cloud_config.region.clone()))
        .credentials_provider(s3::config::Credentials::new(
            &cloud_config.access_key_id,
            &cloud_config.secret_access_key,
            None, // session_token
            None, // expiry
            "Static",
        ));
    if let Some(endpoint) = &cloud_config.endpoint_url {
        sdk_config_builder = sdk_config_builder.endpoint_url(endpoint);
    }
    let sdk_config = sdk_config_builder.load().await;

    let client = s3::Client::new(&sdk_config);

    let body = ByteStream::from_path(&artifact.local_path)
        .await
        .map_err(|e| AppError::TransferFailed {
            key: key.clone(),
            reason: format!(
                "Failed to read artifact {}: {}",
                artifact.local_path.display(),
                e
            ),
        })?;

    client
        .put_object()
        .bucket(&cloud_config.bucket_name)
        .key(&key)
        .body(body)
        .send()
        .await
        .map_err(|e| AppError::TransferFailed {
            key: key.clone(),
            reason: format!(
                "Upload to bucket {} failed: {}",
                cloud_config.bucket_name, e
            ),
        })?;

    println!("✅ Uploaded {} to {}", artifact.local_path.display(), key);
    Ok(key)
}
