//! Optional native extension libraries, located or built on first use.
//!
//! Each capability name resolves at most once per process unless it is
//! explicitly forgotten. The resolved library path is published to
//! [`config::properties`](crate::config::properties) so other components can
//! read it without resolving again.

use crate::cache::Flight;
use crate::config::{properties, BuildConfig, CapabilityConfig, MetricsConfig, RegistryConfig};
use crate::error::{MetricsError, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Library whose presence marks a directory the dynamic linker searches by
/// default.
const PLATFORM_LIBC: &str = "libc.so.6";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CapabilityState {
    Unresolved,
    Located(PathBuf),
    Built(PathBuf),
    Unavailable(String),
}

impl CapabilityState {
    pub fn path(&self) -> Option<&Path> {
        match self {
            CapabilityState::Located(path) | CapabilityState::Built(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.path().is_some()
    }
}

impl fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityState::Unresolved => write!(f, "unresolved"),
            CapabilityState::Located(path) => write!(f, "located {}", path.display()),
            CapabilityState::Built(path) => write!(f, "built {}", path.display()),
            CapabilityState::Unavailable(reason) => write!(f, "unavailable: {}", reason),
        }
    }
}

/// A platform strategy for producing a capability's library.
pub trait Discovery: Send + Sync {
    /// Returns `Located`, `Built` or `Unavailable`; errors mean the attempt
    /// itself failed.
    fn discover(&self, name: &str) -> Result<CapabilityState>;
}

/// Runs an external program and reports its exit code.
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String]) -> Result<i32>;
}

pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> Result<i32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| MetricsError::Config("empty command line".into()))?;
        debug!(argv = ?argv, "running");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| MetricsError::io(program, e))?;

        if !output.status.success() {
            warn!(
                program = %program,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "command failed"
            );
        }
        // killed by a signal
        Ok(output.status.code().unwrap_or(-1))
    }
}

/// Where vendor products are installed, as `(label, path)` pairs in
/// discovery order.
pub trait InstallRoots: Send + Sync {
    fn roots(&self) -> Vec<(String, PathBuf)>;
}

pub struct ConfiguredRoots(pub Vec<(String, PathBuf)>);

impl InstallRoots for ConfiguredRoots {
    fn roots(&self) -> Vec<(String, PathBuf)> {
        self.0.clone()
    }
}

/// Picks an installed library from the vendor's install roots.
pub struct RegistryDiscovery {
    config: RegistryConfig,
    roots: Box<dyn InstallRoots>,
}

impl RegistryDiscovery {
    pub fn new(config: RegistryConfig, roots: Box<dyn InstallRoots>) -> Self {
        Self { config, roots }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        let roots = config
            .roots
            .iter()
            .map(|root| (root.label.clone(), root.path.clone()))
            .collect();
        Self::new(config.clone(), Box::new(ConfiguredRoots(roots)))
    }

    /// Lower ranks first; `None` for labels that do not qualify.
    fn class(&self, label: &str) -> Option<u8> {
        if !label.starts_with(&self.config.vendor_prefix) {
            return None;
        }
        if label.ends_with(&self.config.preferred_suffix) {
            Some(0)
        } else if label.ends_with(&self.config.fallback_suffix) {
            Some(1)
        } else {
            None
        }
    }
}

impl Discovery for RegistryDiscovery {
    fn discover(&self, name: &str) -> Result<CapabilityState> {
        let best = self
            .roots
            .roots()
            .into_iter()
            .enumerate()
            .filter_map(|(index, (label, root))| {
                let class = self.class(&label)?;
                let library = root.join(&self.config.library_file);
                library.is_file().then_some((class, index, library))
            })
            .min_by_key(|(class, index, _)| (*class, *index));

        match best {
            Some((_, _, library)) => {
                info!(capability = name, path = %library.display(), "capability located");
                Ok(CapabilityState::Located(library))
            }
            None => {
                let reason = MetricsError::NotFound {
                    what: format!("{} under any {}install root", self.config.library_file, self.config.vendor_prefix),
                };
                Ok(CapabilityState::Unavailable(reason.to_string()))
            }
        }
    }
}

/// Links the library from an object shipped inside an archive.
pub struct BuildDiscovery {
    config: BuildConfig,
    runner: Arc<dyn CommandRunner>,
}

impl BuildDiscovery {
    pub fn new(config: BuildConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn output_path(&self) -> PathBuf {
        if self.config.output.is_dir() {
            self.config.output.join(&self.config.library_file)
        } else {
            self.config.output.clone()
        }
    }

    fn locate_dependency(&self, library: &str) -> Result<PathBuf> {
        for dir in &self.config.library_dirs {
            let candidate = dir.join(library);
            if candidate.is_file() {
                return Ok(candidate);
            }
            // some vendors ship each library in a directory of the same name
            if candidate.is_dir() {
                let nested = candidate.join(library);
                if nested.is_file() {
                    return Ok(nested);
                }
            }
        }
        Err(MetricsError::NotFound {
            what: format!("shared library {}", library),
        })
    }

    fn link_command(&self, output: &Path, object: &Path, dependencies: &[PathBuf]) -> Vec<String> {
        let mut argv = vec![
            lossy(&self.config.compiler),
            "-shared".to_string(),
            "-o".to_string(),
            lossy(output),
            lossy(object),
        ];

        let mut rpaths: Vec<&Path> = Vec::new();
        for dir in dependencies.iter().filter_map(|dep| dep.parent()) {
            if !rpaths.contains(&dir) && !dir.join(PLATFORM_LIBC).exists() {
                rpaths.push(dir);
            }
        }
        argv.extend(rpaths.iter().map(|dir| format!("-Wl,-rpath,{}", dir.display())));
        argv.extend(dependencies.iter().map(|dep| lossy(dep)));
        argv
    }

    fn exec(&self, argv: Vec<String>) -> Result<()> {
        let code = self.runner.run(&argv)?;
        if code != 0 {
            warn!(argv = ?argv, code, "build step failed");
            return Err(MetricsError::Build { argv, code });
        }
        Ok(())
    }
}

fn lossy(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn ensure_writable_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(MetricsError::io(dir, "not a directory"));
    }
    #[cfg(unix)]
    {
        nix::unistd::access(dir, nix::unistd::AccessFlags::W_OK).map_err(|e| MetricsError::io(dir, e))?;
    }
    #[cfg(not(unix))]
    {
        let meta = std::fs::metadata(dir).map_err(|e| MetricsError::io(dir, e))?;
        if meta.permissions().readonly() {
            return Err(MetricsError::io(dir, "directory is read-only"));
        }
    }
    Ok(())
}

impl Discovery for BuildDiscovery {
    fn discover(&self, name: &str) -> Result<CapabilityState> {
        let output = self.output_path();
        if output.exists() {
            info!(capability = name, path = %output.display(), "capability located");
            return Ok(CapabilityState::Located(output));
        }
        if !self.config.archive.exists() {
            return Ok(CapabilityState::Unavailable(format!(
                "not installed: {} missing",
                self.config.archive.display()
            )));
        }

        let work_dir = output
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        ensure_writable_dir(&work_dir)?;

        let dependencies = self
            .config
            .dependencies
            .iter()
            .map(|library| self.locate_dependency(library))
            .collect::<Result<Vec<_>>>()?;

        let object = work_dir.join(&self.config.member);
        if !object.exists() {
            self.exec(vec![
                lossy(&self.config.archiver),
                "-xf".to_string(),
                lossy(&self.config.archive),
                "-C".to_string(),
                lossy(&work_dir),
                self.config.member.clone(),
            ])?;
        }

        self.exec(self.link_command(&output, &object, &dependencies))?;
        info!(capability = name, path = %output.display(), "capability built");
        Ok(CapabilityState::Built(output))
    }
}

enum Entry {
    Settled(CapabilityState),
    Pending(Arc<Flight<Result<CapabilityState>>>),
}

/// Per-name resolution state and the strategies that produce it.
#[derive(Default)]
pub struct CapabilityLoader {
    discoveries: RwLock<HashMap<String, Arc<dyn Discovery>>>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CapabilityLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide loader.
    pub fn global() -> Arc<CapabilityLoader> {
        static LOADER: OnceLock<Arc<CapabilityLoader>> = OnceLock::new();
        Arc::clone(LOADER.get_or_init(|| Arc::new(CapabilityLoader::new())))
    }

    pub fn register(&self, name: &str, discovery: Arc<dyn Discovery>) {
        self.discoveries.write().insert(name.to_string(), discovery);
    }

    /// Registers every `[capabilities.*]` entry, building with the system
    /// toolchain.
    pub fn register_config(&self, config: &MetricsConfig) {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        for (name, capability) in &config.capabilities {
            let discovery: Arc<dyn Discovery> = match capability {
                CapabilityConfig::Build(build) => Arc::new(BuildDiscovery::new(build.clone(), Arc::clone(&runner))),
                CapabilityConfig::Registry(registry) => Arc::new(RegistryDiscovery::from_config(registry)),
            };
            self.register(name, discovery);
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.discoveries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Current state without resolving; a resolve in progress reads as
    /// `Unresolved`.
    pub fn state(&self, name: &str) -> CapabilityState {
        match self.entries.lock().get(name) {
            Some(Entry::Settled(state)) => state.clone(),
            _ => CapabilityState::Unresolved,
        }
    }

    pub fn resolve(&self, name: &str) -> Result<CapabilityState> {
        let flight = {
            let mut entries = self.entries.lock();

            if let Some(path) = properties::shared_library(name).filter(|p| p.exists()) {
                let settled_here = matches!(
                    entries.get(name),
                    Some(Entry::Settled(state)) if state.path() == Some(path.as_path())
                );
                if !settled_here {
                    debug!(capability = name, path = %path.display(), "using configured library");
                    entries.insert(name.to_string(), Entry::Settled(CapabilityState::Located(path)));
                }
            }

            let (settled, in_flight) = match entries.get(name) {
                Some(Entry::Settled(state)) => (Some(state.clone()), None),
                Some(Entry::Pending(flight)) => (None, Some(Arc::clone(flight))),
                None => (None, None),
            };

            if let Some(state) = settled {
                if let Some(path) = state.path().filter(|path| !path.exists()) {
                    let gone = CapabilityState::Unavailable(format!("{} no longer exists", path.display()));
                    warn!(capability = name, path = %path.display(), "library disappeared");
                    properties::clear_shared_library(name);
                    entries.insert(name.to_string(), Entry::Settled(gone.clone()));
                    return Ok(gone);
                }
                return Ok(state);
            }

            match in_flight {
                Some(flight) => {
                    drop(entries);
                    return flight.wait();
                }
                None => {
                    let flight = Arc::new(Flight::new());
                    entries.insert(name.to_string(), Entry::Pending(Arc::clone(&flight)));
                    flight
                }
            }
        };

        let mut attempt = PendingResolve {
            loader: self,
            name,
            flight,
            published: false,
        };
        let outcome = self.discover(name);
        attempt.publish(outcome.clone());
        outcome
    }

    fn discover(&self, name: &str) -> Result<CapabilityState> {
        let discovery = self.discoveries.read().get(name).cloned();
        match discovery {
            Some(discovery) => discovery.discover(name),
            None => Err(MetricsError::NotFound {
                what: format!("capability {}", name),
            }),
        }
    }

    /// Drops what is known about `name` so the next resolve starts over.
    pub fn forget(&self, name: &str) {
        self.entries.lock().remove(name);
        properties::clear_shared_library(name);
    }

    pub fn reset(&self) {
        let names: Vec<String> = self.entries.lock().drain().map(|(name, _)| name).collect();
        for name in names {
            properties::clear_shared_library(&name);
        }
    }
}

/// Settles an in-progress resolve, or fails it if discovery unwound.
struct PendingResolve<'a> {
    loader: &'a CapabilityLoader,
    name: &'a str,
    flight: Arc<Flight<Result<CapabilityState>>>,
    published: bool,
}

impl PendingResolve<'_> {
    fn publish(&mut self, outcome: Result<CapabilityState>) {
        let settled = match &outcome {
            Ok(state) => state.clone(),
            Err(err) => CapabilityState::Unavailable(err.to_string()),
        };

        {
            let mut entries = self.loader.entries.lock();
            let ours = matches!(
                entries.get(self.name),
                Some(Entry::Pending(flight)) if Arc::ptr_eq(flight, &self.flight)
            );
            if ours {
                if let Some(path) = settled.path() {
                    properties::set_shared_library(self.name, path);
                }
                entries.insert(self.name.to_string(), Entry::Settled(settled));
            }
        }

        self.flight.complete(outcome);
        self.published = true;
    }
}

impl Drop for PendingResolve<'_> {
    fn drop(&mut self) {
        if !self.published {
            let err = MetricsError::provider("capability", self.name, "resolve panicked");
            self.publish(Err(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Pretends to be tar and gcc: creates the files they would write.
    #[derive(Default)]
    struct FakeToolchain {
        extracts: AtomicUsize,
        links: AtomicUsize,
        link_exit: i32,
        link_delay: Duration,
        last_link: Mutex<Vec<String>>,
    }

    impl FakeToolchain {
        fn failing(code: i32) -> Self {
            Self {
                link_exit: code,
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                link_delay: delay,
                ..Self::default()
            }
        }
    }

    impl CommandRunner for FakeToolchain {
        fn run(&self, argv: &[String]) -> Result<i32> {
            if argv.iter().any(|arg| arg == "-xf") {
                self.extracts.fetch_add(1, Ordering::SeqCst);
                let dir = PathBuf::from(&argv[4]);
                let member = dir.join(&argv[5]);
                fs::create_dir_all(member.parent().unwrap()).unwrap();
                fs::write(member, b"obj").unwrap();
                return Ok(0);
            }
            self.links.fetch_add(1, Ordering::SeqCst);
            *self.last_link.lock() = argv.to_vec();
            thread::sleep(self.link_delay);
            if self.link_exit == 0 {
                fs::write(&argv[3], b"lib").unwrap();
            }
            Ok(self.link_exit)
        }
    }

    struct Fixture {
        dir: TempDir,
        config: BuildConfig,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let libs = dir.path().join("lib");
        fs::create_dir_all(&out).unwrap();
        fs::create_dir_all(libs.join("libssl.so.0.9.7")).unwrap();
        fs::write(libs.join("libssl.so.0.9.7").join("libssl.so.0.9.7"), b"").unwrap();
        fs::write(libs.join("libcrypto.so.0.9.7"), b"").unwrap();
        let archive = dir.path().join("control.tar");
        fs::write(&archive, b"tar").unwrap();

        let config = BuildConfig {
            output: out,
            library_file: "vmcontrol.so".into(),
            archive,
            member: "control-only/vmcontrol.o".into(),
            compiler: "/usr/bin/gcc".into(),
            archiver: "/bin/tar".into(),
            dependencies: vec!["libssl.so.0.9.7".into(), "libcrypto.so.0.9.7".into()],
            library_dirs: vec![libs],
        };
        Fixture { dir, config }
    }

    fn loader_with(name: &str, config: BuildConfig, runner: Arc<FakeToolchain>) -> CapabilityLoader {
        let loader = CapabilityLoader::new();
        loader.register(name, Arc::new(BuildDiscovery::new(config, runner)));
        loader
    }

    #[test]
    fn existing_artifact_needs_no_build() {
        let fx = fixture();
        let lib = fx.config.output.join("vmcontrol.so");
        fs::write(&lib, b"lib").unwrap();
        let runner = Arc::new(FakeToolchain::default());
        let loader = loader_with("cap-existing", fx.config.clone(), Arc::clone(&runner));

        assert_eq!(loader.resolve("cap-existing").unwrap(), CapabilityState::Located(lib.clone()));
        assert_eq!(loader.resolve("cap-existing").unwrap(), CapabilityState::Located(lib.clone()));
        assert_eq!(runner.links.load(Ordering::SeqCst), 0);
        assert_eq!(runner.extracts.load(Ordering::SeqCst), 0);
        assert_eq!(properties::shared_library("cap-existing"), Some(lib));
        loader.forget("cap-existing");
    }

    #[test]
    fn builds_once_and_publishes_the_path() {
        let fx = fixture();
        let runner = Arc::new(FakeToolchain::default());
        let loader = loader_with("cap-build", fx.config.clone(), Arc::clone(&runner));

        let lib = fx.config.output.join("vmcontrol.so");
        assert_eq!(loader.resolve("cap-build").unwrap(), CapabilityState::Built(lib.clone()));
        assert_eq!(loader.state("cap-build"), CapabilityState::Built(lib.clone()));
        assert_eq!(properties::shared_library("cap-build"), Some(lib));
        assert_eq!(runner.extracts.load(Ordering::SeqCst), 1);
        assert_eq!(runner.links.load(Ordering::SeqCst), 1);

        loader.resolve("cap-build").unwrap();
        assert_eq!(runner.links.load(Ordering::SeqCst), 1);
        loader.forget("cap-build");
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        let fx = fixture();
        let runner = Arc::new(FakeToolchain::slow(Duration::from_millis(100)));
        let loader = Arc::new(loader_with("cap-race", fx.config.clone(), Arc::clone(&runner)));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let loader = Arc::clone(&loader);
                thread::spawn(move || loader.resolve("cap-race"))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let lib = fx.config.output.join("vmcontrol.so");
        for result in results {
            assert_eq!(result.unwrap(), CapabilityState::Built(lib.clone()));
        }
        assert_eq!(runner.links.load(Ordering::SeqCst), 1);
        loader.forget("cap-race");
    }

    #[test]
    fn failed_link_reports_argv_and_code() {
        let fx = fixture();
        let runner = Arc::new(FakeToolchain::failing(1));
        let loader = loader_with("cap-fail", fx.config.clone(), Arc::clone(&runner));

        match loader.resolve("cap-fail") {
            Err(MetricsError::Build { argv, code }) => {
                assert_eq!(code, 1);
                assert_eq!(argv[0], "/usr/bin/gcc");
                assert_eq!(argv[1], "-shared");
            }
            other => panic!("unexpected {other:?}"),
        }
        // no automatic retry; the failure is now the settled state
        assert!(matches!(loader.resolve("cap-fail"), Ok(CapabilityState::Unavailable(_))));
        assert_eq!(runner.links.load(Ordering::SeqCst), 1);
        assert_eq!(properties::shared_library("cap-fail"), None);

        loader.forget("cap-fail");
        assert!(loader.resolve("cap-fail").is_err());
        assert_eq!(runner.links.load(Ordering::SeqCst), 2);
        loader.forget("cap-fail");
    }

    #[test]
    fn missing_archive_means_not_installed() {
        let mut fx = fixture();
        fx.config.archive = fx.dir.path().join("absent.tar");
        let runner = Arc::new(FakeToolchain::default());
        let loader = loader_with("cap-absent", fx.config, Arc::clone(&runner));

        match loader.resolve("cap-absent").unwrap() {
            CapabilityState::Unavailable(reason) => assert!(reason.starts_with("not installed")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(runner.links.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_dependency_is_not_found() {
        let mut fx = fixture();
        fx.config.dependencies.push("libmissing.so.1".into());
        let loader = loader_with("cap-nodep", fx.config, Arc::new(FakeToolchain::default()));

        assert_eq!(
            loader.resolve("cap-nodep"),
            Err(MetricsError::NotFound {
                what: "shared library libmissing.so.1".into()
            })
        );
    }

    #[test]
    fn rpath_only_for_directories_without_libc() {
        let fx = fixture();
        let system = fx.dir.path().join("system");
        fs::create_dir_all(&system).unwrap();
        fs::write(system.join(PLATFORM_LIBC), b"").unwrap();

        let discovery = BuildDiscovery::new(fx.config.clone(), Arc::new(FakeToolchain::default()));
        let vendor = fx.config.library_dirs[0].clone();
        let deps = vec![
            vendor.join("libcrypto.so.0.9.7"),
            vendor.join("libz.so.1"),
            system.join("libm.so.6"),
        ];
        let argv = discovery.link_command(Path::new("/o/x.so"), Path::new("/o/x.o"), &deps);

        let rpaths: Vec<&String> = argv.iter().filter(|a| a.starts_with("-Wl,-rpath,")).collect();
        assert_eq!(rpaths, vec![&format!("-Wl,-rpath,{}", vendor.display())]);
        assert_eq!(&argv[..5], &["/usr/bin/gcc", "-shared", "-o", "/o/x.so", "/o/x.o"]);
        assert!(argv.ends_with(&[
            lossy(&deps[0]),
            lossy(&deps[1]),
            lossy(&deps[2]),
        ]));
    }

    #[test]
    fn dependency_found_in_named_subdirectory() {
        let fx = fixture();
        let discovery = BuildDiscovery::new(fx.config.clone(), Arc::new(FakeToolchain::default()));
        let found = discovery.locate_dependency("libssl.so.0.9.7").unwrap();
        assert_eq!(
            found,
            fx.config.library_dirs[0].join("libssl.so.0.9.7").join("libssl.so.0.9.7")
        );
    }

    #[test]
    fn vanished_artifact_becomes_unavailable() {
        let fx = fixture();
        let loader = loader_with("cap-vanish", fx.config.clone(), Arc::new(FakeToolchain::default()));
        let lib = fx.config.output.join("vmcontrol.so");
        assert_eq!(loader.resolve("cap-vanish").unwrap(), CapabilityState::Built(lib.clone()));

        fs::remove_file(&lib).unwrap();
        assert!(matches!(loader.resolve("cap-vanish"), Ok(CapabilityState::Unavailable(_))));
        assert_eq!(properties::shared_library("cap-vanish"), None);
        loader.forget("cap-vanish");
    }

    #[test]
    fn configured_library_wins() {
        let fx = fixture();
        let custom = fx.dir.path().join("custom.so");
        fs::write(&custom, b"lib").unwrap();
        let runner = Arc::new(FakeToolchain::default());
        let loader = loader_with("cap-override", fx.config, Arc::clone(&runner));

        properties::set_shared_library("cap-override", &custom);
        assert_eq!(loader.resolve("cap-override").unwrap(), CapabilityState::Located(custom));
        assert_eq!(runner.links.load(Ordering::SeqCst), 0);
        loader.forget("cap-override");
    }

    #[test]
    fn unknown_capability_is_not_found() {
        let loader = CapabilityLoader::new();
        assert!(matches!(loader.resolve("cap-unknown"), Err(MetricsError::NotFound { .. })));
        assert_eq!(loader.state("cap-unknown"), CapabilityState::Unavailable("capability cap-unknown not found".into()));
    }

    fn registry(roots: Vec<(&str, PathBuf)>) -> RegistryDiscovery {
        let config = RegistryConfig {
            vendor_prefix: "VMware ".into(),
            preferred_suffix: " Server".into(),
            fallback_suffix: " API".into(),
            library_file: "vmcontrollib.dll".into(),
            roots: Vec::new(),
        };
        let roots = roots.into_iter().map(|(label, path)| (label.to_string(), path)).collect();
        RegistryDiscovery::new(config, Box::new(ConfiguredRoots(roots)))
    }

    fn install(dir: &TempDir, name: &str) -> PathBuf {
        let root = dir.path().join(name);
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("vmcontrollib.dll"), b"").unwrap();
        root
    }

    #[test]
    fn registry_prefers_server_then_discovery_order() {
        let dir = TempDir::new().unwrap();
        let api = install(&dir, "api");
        let server_a = install(&dir, "server-a");
        let server_b = install(&dir, "server-b");
        let other = install(&dir, "other");
        let empty = dir.path().join("empty");

        let discovery = registry(vec![
            ("VMware VIX API", api.clone()),
            ("VMware Server", empty),
            ("Acme Server", other),
            ("VMware Server", server_a.clone()),
            ("VMware Server", server_b),
        ]);
        assert_eq!(
            discovery.discover("vmcontrol").unwrap(),
            CapabilityState::Located(server_a.join("vmcontrollib.dll"))
        );

        let discovery = registry(vec![("VMware Workstation", install(&dir, "ws")), ("VMware VIX API", api.clone())]);
        assert_eq!(
            discovery.discover("vmcontrol").unwrap(),
            CapabilityState::Located(api.join("vmcontrollib.dll"))
        );
    }

    #[test]
    fn registry_without_candidates_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let discovery = registry(vec![("Acme Server", install(&dir, "acme"))]);
        match discovery.discover("vmcontrol").unwrap() {
            CapabilityState::Unavailable(reason) => assert!(reason.contains("vmcontrollib.dll")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reset_clears_every_name() {
        let fx = fixture();
        let loader = loader_with("cap-reset", fx.config.clone(), Arc::new(FakeToolchain::default()));
        loader.resolve("cap-reset").unwrap();
        loader.reset();
        assert_eq!(loader.state("cap-reset"), CapabilityState::Unresolved);
        assert_eq!(properties::shared_library("cap-reset"), None);
    }
}
