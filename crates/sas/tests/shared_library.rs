//! Loads the bypass component from its shared library build and checks that
//! its log events reach the host subscriber.

use std::io::Write;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sas_core::application::COMPONENTS_PATH;
use sas_core::{
    Application, ComponentLoader, DynamicLibraryOpener, ErrorList, MemoryConfigReader,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn count(&self, needle: &str) -> usize {
        String::from_utf8_lossy(&self.0.lock()).matches(needle).count()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn captured() -> &'static Captured {
    static CAPTURED: OnceLock<Captured> = OnceLock::new();
    CAPTURED.get_or_init(|| {
        let captured = Captured::default();
        let writer = captured.clone();
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(move || writer.clone()),
            )
            .init();
        captured
    })
}

/// The cdylib next to this test binary, in `deps/` or the profile directory
fn bypass_library() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let deps = exe.parent()?;
    let prefix = format!("{}sas_bypass", std::env::consts::DLL_PREFIX);
    let suffix = std::env::consts::DLL_SUFFIX;

    [Some(deps), deps.parent()]
        .into_iter()
        .flatten()
        .find_map(|dir| {
            std::fs::read_dir(dir)
                .ok()?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .find(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(suffix))
                })
        })
        .map(|path| path.display().to_string())
}

#[test]
fn test_shared_library_component() {
    let captured = captured();
    let Some(path) = bypass_library() else {
        eprintln!("sas_bypass shared library not found next to the test binary, skipping");
        return;
    };
    let mut ec = ErrorList::new();

    // keeps the library mapped for the whole test
    let mut loader = ComponentLoader::new(path.clone());
    assert!(loader.load(&DynamicLibraryOpener, &mut ec), "{}", ec.join("; "));
    assert_eq!(loader.component().map(|c| c.name()), Some("SAS Bypass"));
    assert_eq!(loader.component().map(|c| c.version()), Some("1.0"));

    let config = MemoryConfigReader::new().with_list(COMPONENTS_PATH, [path.as_str()]);
    let app = Application::with_opener(Arc::new(config), Vec::new(), DynamicLibraryOpener);
    assert!(app.dispatch().is_some());
    assert!(app.init(&mut ec), "{}", ec.join("; "));

    assert_eq!(captured.count("Initializing component"), 1);
    assert!(captured.count("No loopback connectors configured") >= 1);
    assert!(captured.count("No bypass modules configured") >= 1);

    app.deinit();
    assert_eq!(captured.count("Detaching component"), 1);

    loader.unload();
    assert!(!loader.is_loaded());
    assert!(loader.component().is_none());
    assert_eq!(captured.count("Detaching component"), 2);
}
