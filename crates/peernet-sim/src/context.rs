//! Process-wide simulation context: paths, RNG, image store, world model

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;

use peernet_core::{ImageData, ServerKind, SimError, SimResult, WildcardFilter, WorldModel};

/// On-disk layout relative to the simulator's working directory.
#[derive(Debug, Clone)]
pub struct SimPaths {
    base: PathBuf,
}

impl SimPaths {
    /// Anchor the layout at a base directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Binary template copied into each instance of the given kind.
    pub fn bin_template(&self, kind: ServerKind) -> PathBuf {
        self.base.join("bin").join(kind.template_dir())
    }

    /// Candidate profile and thumbnail images.
    pub fn images(&self) -> PathBuf {
        self.base.join("images")
    }

    /// Per-instance runtime directories.
    pub fn instances(&self) -> PathBuf {
        self.base.join("instances")
    }

    /// Snapshot storage.
    pub fn snapshots(&self) -> PathBuf {
        self.base.join("snapshots")
    }

    /// Directory of one named snapshot.
    pub fn snapshot_dir(&self, name: &str) -> PathBuf {
        self.snapshots().join(name)
    }
}

/// Candidate image files, loaded lazily and cached by file name.
#[derive(Debug, Default)]
pub struct ImageStore {
    dir: PathBuf,
    names: Option<Vec<String>>,
    cache: HashMap<String, ImageData>,
}

impl ImageStore {
    /// Store over the given images directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            names: None,
            cache: HashMap::new(),
        }
    }

    fn candidates(&mut self) -> SimResult<&[String]> {
        if self.names.is_none() {
            let mut names = Vec::new();
            let entries = std::fs::read_dir(&self.dir).map_err(|e| {
                SimError::io(format!("cannot list images in {}: {e}", self.dir.display()))
            })?;
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            // Directory order is filesystem-dependent; sort for determinism.
            names.sort();
            self.names = Some(names);
        }
        Ok(self.names.as_deref().unwrap_or(&[]))
    }

    /// Pick a uniformly random image whose file name matches the mask.
    pub fn pick(&mut self, mask: &str, rng: &mut ChaCha12Rng) -> SimResult<ImageData> {
        let filter = WildcardFilter::parse(mask);
        let matching: Vec<String> = self
            .candidates()?
            .iter()
            .filter(|name| filter.matches(name))
            .cloned()
            .collect();
        if matching.is_empty() {
            return Err(SimError::not_found(format!(
                "no image in {} matches mask '{mask}'",
                self.dir.display()
            )));
        }
        let name = &matching[rng.gen_range(0..matching.len())];
        if let Some(image) = self.cache.get(name) {
            return Ok(image.clone());
        }
        let bytes = std::fs::read(self.dir.join(name))
            .map_err(|e| SimError::io(format!("cannot read image {name}: {e}")))?;
        let image = ImageData::new(bytes);
        self.cache.insert(name.clone(), image.clone());
        Ok(image)
    }
}

/// Everything a command handler needs: the world model, the on-disk layout,
/// the process-wide RNG, and the image store.
pub struct SimContext {
    /// Ground-truth tables
    pub world: WorldModel,
    /// On-disk layout
    pub paths: SimPaths,
    /// Process-wide RNG; seeded explicitly for reproducible runs
    pub rng: ChaCha12Rng,
    /// Candidate images
    pub images: ImageStore,
    /// The seed the RNG was created from
    pub seed: u64,
}

impl SimContext {
    /// Build a context rooted at `base_dir`. Without an explicit seed the
    /// RNG is seeded from OS entropy; the chosen seed is recorded either way.
    pub fn new(base_dir: impl Into<PathBuf>, seed: Option<u64>) -> Self {
        let paths = SimPaths::new(base_dir);
        let seed = seed.unwrap_or_else(rand::random);
        Self {
            world: WorldModel::new(),
            images: ImageStore::new(paths.images()),
            paths,
            rng: ChaCha12Rng::seed_from_u64(seed),
            seed,
        }
    }
}

/// Current wall-clock time as Unix seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Recursively copy a directory tree, skipping entries whose file name is in
/// `exclude` at any depth.
pub fn copy_dir_recursive(src: &Path, dst: &Path, exclude: &[&str]) -> SimResult<()> {
    if !src.is_dir() {
        return Err(SimError::io(format!(
            "source directory {} does not exist",
            src.display()
        )));
    }
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|e| name.to_string_lossy() == *e) {
            continue;
        }
        let target = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target, exclude)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn copy_skips_excluded_directories() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("Logs")).unwrap();
        std::fs::create_dir_all(src.path().join("data")).unwrap();
        std::fs::write(src.path().join("Logs/run.log"), b"log").unwrap();
        std::fs::write(src.path().join("data/db"), b"db").unwrap();
        std::fs::write(src.path().join("server.conf"), b"conf").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("copy");
        copy_dir_recursive(src.path(), &target, &["Logs", "tmp"]).unwrap();

        assert!(target.join("data/db").is_file());
        assert!(target.join("server.conf").is_file());
        assert!(!target.join("Logs").exists());
    }

    #[test]
    fn image_pick_is_deterministic_and_mask_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cat.png"), b"cat").unwrap();
        std::fs::write(dir.path().join("dog.png"), b"dog").unwrap();
        std::fs::write(dir.path().join("note.txt"), b"note").unwrap();

        let mut a = ImageStore::new(dir.path());
        let mut b = ImageStore::new(dir.path());
        let mut rng_a = ChaCha12Rng::seed_from_u64(5);
        let mut rng_b = ChaCha12Rng::seed_from_u64(5);
        for _ in 0..10 {
            let left = a.pick("*.png", &mut rng_a).unwrap();
            let right = b.pick("*.png", &mut rng_b).unwrap();
            assert_eq!(left.hash(), right.hash());
        }
        assert!(a.pick("*.gif", &mut rng_a).is_err());
    }
}
