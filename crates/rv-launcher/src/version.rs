//! Check the running version against the published release

use std::cmp::Ordering;
use std::time::Duration;

/// How the running version compares to the published one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStatus {
    UpToDate,
    Ahead { remote: String },
    Behind { remote: String },
}

/// First `version = "..."` value in a published manifest
pub fn extract_version(manifest: &str) -> Option<String> {
    manifest.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() != "version" {
            return None;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty() && value.chars().next()?.is_ascii_digit()).then(|| value.to_string())
    })
}

fn numeric_parts(version: &str) -> Vec<u64> {
    version
        .split(|c: char| c == '.' || c == '-' || c == '+')
        .map_while(|part| part.parse().ok())
        .collect()
}

/// Compare two dotted versions numerically; missing parts count as zero
pub fn compare_versions(local: &str, remote: &str) -> Ordering {
    let (a, b) = (numeric_parts(local), numeric_parts(remote));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Classify `local` against the version found in `manifest`
pub fn version_status(local: &str, manifest: &str) -> Option<VersionStatus> {
    let remote = extract_version(manifest)?;
    Some(match compare_versions(local, &remote) {
        Ordering::Equal => VersionStatus::UpToDate,
        Ordering::Greater => VersionStatus::Ahead { remote },
        Ordering::Less => VersionStatus::Behind { remote },
    })
}

/// Fetch the manifest at `url` and log how `local` compares.
///
/// Never fails; problems are logged as warnings.
pub async fn check_version(url: &str, local: &str) -> Option<VersionStatus> {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Unable to verify remote version: {}", e);
            return None;
        }
    };

    let body = match client.get(url).send().await.and_then(|r| r.error_for_status()) {
        Ok(response) => match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Unable to verify remote version: {}", e);
                return None;
            }
        },
        Err(e) => {
            tracing::warn!("Unable to verify remote version: {}", e);
            return None;
        }
    };

    let status = version_status(local, &body);
    match &status {
        Some(VersionStatus::UpToDate) => {
            tracing::info!("Your software is up to date (v{})", local)
        }
        Some(VersionStatus::Ahead { .. }) => {
            tracing::info!("Your software (v{}) is ahead of the released version", local)
        }
        Some(VersionStatus::Behind { remote }) => tracing::warn!(
            "Your local software (v{}) is not the currently available version (v{})",
            local,
            remote
        ),
        None => tracing::warn!("Unable to determine released software version"),
    }
    status
}
