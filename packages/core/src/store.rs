//! Artifact Store
//!
//! Filesystem persistence for compiled artifacts, keyed by
//! `(model_identifier, ShapeSpec)`.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//!   .staging/                       in-progress writes
//!   <sanitized model id>-<hash>/
//!     b1_s384/                      ArtifactLocation
//!       CURRENT                     name of the published generation
//!       .lock                       held while a writer publishes
//!       gen-<uuid>/
//!         model.bin                 payload
//!         artifact.json             ArtifactMetadata
//! ```
//!
//! ## Atomic Publish
//!
//! A save writes a complete generation under `.staging/`, syncs it, renames it
//! into the bundle directory and only then swaps `CURRENT` (write temp file,
//! rename over). Readers resolve `CURRENT` first, so they see either the old
//! generation or the new one, never a partial write.
//!
//! Moving a generation into the bundle, swapping `CURRENT` and pruning
//! superseded generations happen under the bundle's `.lock` file, so one
//! writer never prunes a generation another writer has not published yet.
//! The two newest generations are kept; a reader whose generation is pruned
//! anyway sees `CURRENT` move and resolves again.

use crate::artifact::{payload_checksum, ArtifactLocation, ArtifactMetadata, CompiledArtifact, ARTIFACT_FORMAT_VERSION};
use crate::config::{model_dir_name, StoreConfig};
use crate::error::StoreError;
use crate::shape::ShapeSpec;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const CURRENT_FILE: &str = "CURRENT";
const PAYLOAD_FILE: &str = "model.bin";
const METADATA_FILE: &str = "artifact.json";
const STAGING_DIR: &str = ".staging";
const GENERATION_PREFIX: &str = "gen-";
const LOCK_FILE: &str = ".lock";

/// Generations kept after publish (current + previous)
const RETAINED_GENERATIONS: usize = 2;

/// Staging entries older than this are leftovers of crashed writers
const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// A `.lock` older than this belongs to a writer that died mid-publish
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// Times a reader re-resolves `CURRENT` after its generation was pruned
const RESOLVE_ATTEMPTS: usize = 8;

pub type Result<T> = std::result::Result<T, StoreError>;

/// A published artifact found by [`ArtifactStore::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub location: ArtifactLocation,
    pub metadata: ArtifactMetadata,
}

/// Durable key-value store of compiled artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging).map_err(|e| StoreError::write(&staging, e))?;

        let store = Self { root };
        store.remove_stale_staging();
        Ok(store)
    }

    /// Open an existing store without creating or cleaning anything.
    ///
    /// Used by read paths that are handed a location and must not touch
    /// directories the user did not ask for.
    pub fn existing(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::not_found(&root));
        }
        Ok(Self { root })
    }

    /// Open the store described by configuration
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let root = config
            .resolve_root()
            .map_err(|e| StoreError::write(".", e))?;
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the artifact for a key, whether or not it exists yet
    pub fn location_for(&self, model_identifier: &str, shape: ShapeSpec) -> ArtifactLocation {
        ArtifactLocation::new(
            self.root
                .join(model_dir_name(model_identifier))
                .join(shape.key()),
        )
    }

    /// Whether a published artifact exists for the key
    pub fn contains(&self, model_identifier: &str, shape: ShapeSpec) -> bool {
        self.location_for(model_identifier, shape)
            .path()
            .join(CURRENT_FILE)
            .is_file()
    }

    /// Persist an artifact, atomically replacing any previous one for its key.
    ///
    /// Returns the stable location token of the key.
    pub fn save(&self, artifact: &CompiledArtifact) -> Result<ArtifactLocation> {
        let location = self.location_for(artifact.model_identifier(), artifact.shape());
        let bundle = location.path();
        let generation = format!("{}{}", GENERATION_PREFIX, Uuid::new_v4().simple());

        let staging = self.root.join(STAGING_DIR).join(&generation);
        if let Err(e) = write_generation(&staging, artifact) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let lock = BundleLock::acquire(bundle).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            e
        })?;

        let published = bundle.join(&generation);
        fs::rename(&staging, &published).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            StoreError::write(&published, e)
        })?;

        if let Err(e) = publish_pointer(bundle, &generation) {
            let _ = fs::remove_dir_all(&published);
            return Err(e);
        }

        tracing::info!(
            "Published artifact '{}' [{}] at {} ({} bytes, checksum {})",
            artifact.model_identifier(),
            artifact.shape(),
            location,
            artifact.payload().len(),
            artifact.checksum()
        );

        self.prune_generations(bundle);
        drop(lock);
        Ok(location)
    }

    /// Load the published artifact at `location`, verifying payload integrity
    pub fn load(&self, location: &ArtifactLocation) -> Result<CompiledArtifact> {
        read_published(location, |generation_dir, metadata| {
            read_payload(location, generation_dir, metadata)
        })
    }

    /// Read only the sidecar metadata of the published artifact
    pub fn read_metadata(&self, location: &ArtifactLocation) -> Result<ArtifactMetadata> {
        read_published(location, |_, metadata| Ok(metadata))
    }

    /// All published artifacts under this store, sorted by location.
    ///
    /// Bundles whose metadata cannot be read are skipped with a warning.
    pub fn list(&self) -> Result<Vec<StoredArtifact>> {
        let mut found = Vec::new();

        for model_dir in read_subdirs(&self.root)? {
            if model_dir.file_name().is_some_and(|n| n == STAGING_DIR) {
                continue;
            }

            for bundle in read_subdirs(&model_dir)? {
                if !bundle.join(CURRENT_FILE).is_file() {
                    continue;
                }
                let location = ArtifactLocation::new(bundle);
                match self.read_metadata(&location) {
                    Ok(metadata) => found.push(StoredArtifact { location, metadata }),
                    Err(e) => tracing::warn!("Skipping unreadable artifact: {}", e),
                }
            }
        }

        found.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(found)
    }

    /// Explicitly destroy the artifact at `location`
    pub fn delete(&self, location: &ArtifactLocation) -> Result<()> {
        let bundle = location.path();
        if !bundle.join(CURRENT_FILE).is_file() {
            return Err(StoreError::not_found(bundle));
        }

        let lock = BundleLock::acquire(bundle)?;
        fs::remove_dir_all(bundle).map_err(|e| StoreError::write(bundle, e))?;
        lock.removed_with_bundle();

        // Drop the model directory once its last shape is gone
        if let Some(model_dir) = bundle.parent() {
            if model_dir != self.root {
                let _ = fs::remove_dir(model_dir);
            }
        }

        tracing::info!("Deleted artifact at {}", location);
        Ok(())
    }

    /// Remove generations beyond the newest `RETAINED_GENERATIONS`, never
    /// touching the one `CURRENT` points at. Runs under the bundle lock, so
    /// every generation present is already published. Failures only warn.
    fn prune_generations(&self, bundle: &Path) {
        let current = fs::read_to_string(bundle.join(CURRENT_FILE))
            .map(|s| s.trim().to_string())
            .ok();

        let entries = match fs::read_dir(bundle) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot scan {} for old generations: {}", bundle.display(), e);
                return;
            }
        };

        let mut generations: Vec<(SystemTime, PathBuf, String)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with(GENERATION_PREFIX) {
                    return None;
                }
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, entry.path(), name))
            })
            .collect();

        // Current pointer first, then newest first
        let is_current = |name: &str| current.as_deref() == Some(name);
        generations.sort_by(|a, b| {
            is_current(&b.2)
                .cmp(&is_current(&a.2))
                .then_with(|| b.0.cmp(&a.0))
        });

        for (_, path, _) in generations.into_iter().skip(RETAINED_GENERATIONS) {
            match fs::remove_dir_all(&path) {
                Ok(()) => tracing::debug!("Pruned superseded generation {}", path.display()),
                Err(e) => tracing::warn!("Failed to prune {}: {}", path.display(), e),
            }
        }
    }

    fn remove_stale_staging(&self) {
        let staging = self.root.join(STAGING_DIR);
        let Ok(entries) = fs::read_dir(&staging) else {
            return;
        };

        let now = SystemTime::now();
        for entry in entries.filter_map(|e| e.ok()) {
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());

            if age.is_some_and(|age| age > STALE_STAGING_AGE) {
                let path = entry.path();
                if fs::remove_dir_all(&path).is_ok() {
                    tracing::info!("Removed stale staging entry {}", path.display());
                }
            }
        }
    }
}

/// Exclusive right to publish into one bundle, held as a `.lock` file.
///
/// Released when dropped. A lock left behind by a crashed writer is broken
/// once it is older than `STALE_LOCK_AGE`.
struct BundleLock {
    path: PathBuf,
    held: bool,
}

impl BundleLock {
    fn acquire(bundle: &Path) -> Result<Self> {
        let path = bundle.join(LOCK_FILE);
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path, held: true }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        tracing::warn!("Breaking stale bundle lock {}", path.display());
                        let _ = fs::remove_file(&path);
                    } else {
                        thread::sleep(LOCK_RETRY_INTERVAL);
                    }
                }
                // Bundle not created yet, or removed by a concurrent delete
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    fs::create_dir_all(bundle).map_err(|e| StoreError::write(bundle, e))?;
                }
                Err(e) => return Err(StoreError::write(&path, e)),
            }
        }
    }

    /// The lock file went away with its bundle; a later writer may already
    /// hold a new one at the same path.
    fn removed_with_bundle(mut self) {
        self.held = false;
    }
}

impl Drop for BundleLock {
    fn drop(&mut self) {
        if self.held {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

/// Resolve the published generation and hand it to `read`.
///
/// A generation can be pruned between resolving `CURRENT` and reading its
/// files. When that happens `CURRENT` has moved on, so resolve again instead
/// of reporting corruption.
fn read_published<T>(
    location: &ArtifactLocation,
    read: impl Fn(&Path, ArtifactMetadata) -> Result<T>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        let generation = current_generation(location.path())?;
        let result = resolve(location, &generation)
            .and_then(|(generation_dir, metadata)| read(&generation_dir, metadata));

        match result {
            Err(StoreError::CorruptArtifact { .. })
                if attempt < RESOLVE_ATTEMPTS
                    && current_generation(location.path()).ok().as_ref() != Some(&generation) =>
            {
                tracing::debug!(
                    "Generation '{}' at {} was superseded while reading, resolving again",
                    generation,
                    location
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Read and verify the payload of one resolved generation
fn read_payload(
    location: &ArtifactLocation,
    generation_dir: &Path,
    metadata: ArtifactMetadata,
) -> Result<CompiledArtifact> {
    let payload_path = generation_dir.join(PAYLOAD_FILE);
    let payload = fs::read(&payload_path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => StoreError::corrupt(location.path(), "payload file is missing"),
        _ => StoreError::read(&payload_path, e),
    })?;

    if payload.len() as u64 != metadata.payload_len {
        return Err(StoreError::corrupt(
            location.path(),
            format!(
                "payload is {} bytes but metadata records {}",
                payload.len(),
                metadata.payload_len
            ),
        ));
    }

    let checksum = payload_checksum(&payload);
    if checksum != metadata.payload_checksum {
        return Err(StoreError::corrupt(
            location.path(),
            format!(
                "payload checksum {} does not match metadata checksum {}",
                checksum, metadata.payload_checksum
            ),
        ));
    }

    tracing::debug!(
        "Loaded artifact '{}' [{}] from {}",
        metadata.model_identifier,
        metadata.shape,
        location
    );

    Ok(CompiledArtifact::from_parts(metadata, payload))
}

/// Generation name `CURRENT` points at
fn current_generation(bundle: &Path) -> Result<String> {
    let pointer = bundle.join(CURRENT_FILE);
    match fs::read_to_string(&pointer) {
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::not_found(bundle)),
        Err(e) => Err(StoreError::read(&pointer, e)),
    }
}

/// Parse the metadata of `generation`
fn resolve(location: &ArtifactLocation, generation: &str) -> Result<(PathBuf, ArtifactMetadata)> {
    let bundle = location.path();

    if !generation.starts_with(GENERATION_PREFIX)
        || generation.contains(['/', '\\'])
        || generation.contains("..")
    {
        return Err(StoreError::corrupt(
            bundle,
            format!("CURRENT holds an invalid generation name '{}'", generation),
        ));
    }

    let generation_dir = bundle.join(generation);
    if !generation_dir.is_dir() {
        return Err(StoreError::corrupt(
            bundle,
            format!("CURRENT points at missing generation '{}'", generation),
        ));
    }

    let metadata_path = generation_dir.join(METADATA_FILE);
    let raw = fs::read(&metadata_path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => StoreError::corrupt(bundle, "metadata file is missing"),
        _ => StoreError::read(&metadata_path, e),
    })?;

    let metadata: ArtifactMetadata = serde_json::from_slice(&raw)
        .map_err(|e| StoreError::corrupt(bundle, format!("invalid metadata: {}", e)))?;

    if metadata.format_version > ARTIFACT_FORMAT_VERSION {
        return Err(StoreError::corrupt(
            bundle,
            format!(
                "metadata format version {} is newer than supported version {}",
                metadata.format_version, ARTIFACT_FORMAT_VERSION
            ),
        ));
    }

    Ok((generation_dir, metadata))
}

/// Write payload and metadata into a fresh staging directory and sync both
fn write_generation(dir: &Path, artifact: &CompiledArtifact) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| StoreError::write(dir, e))?;

    write_synced(&dir.join(PAYLOAD_FILE), artifact.payload())?;

    let metadata = serde_json::to_vec_pretty(artifact.metadata()).map_err(|e| {
        StoreError::write(
            dir.join(METADATA_FILE),
            std::io::Error::new(ErrorKind::InvalidData, e),
        )
    })?;
    write_synced(&dir.join(METADATA_FILE), &metadata)?;

    sync_dir(dir);
    Ok(())
}

/// Swap the `CURRENT` pointer to `generation` (temp file + rename)
fn publish_pointer(bundle: &Path, generation: &str) -> Result<()> {
    let temp = bundle.join(format!("{}.{}.tmp", CURRENT_FILE, Uuid::new_v4().simple()));
    if let Err(e) = write_synced(&temp, generation.as_bytes()) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    let pointer = bundle.join(CURRENT_FILE);
    fs::rename(&temp, &pointer).map_err(|e| {
        let _ = fs::remove_file(&temp);
        StoreError::write(&pointer, e)
    })?;

    sync_dir(bundle);
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).map_err(|e| StoreError::write(path, e))?;
    file.write_all(bytes).map_err(|e| StoreError::write(path, e))?;
    file.sync_all().map_err(|e| StoreError::write(path, e))
}

/// Best-effort directory sync so renames survive a crash
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::read(dir, e)),
    };

    Ok(entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect())
}
