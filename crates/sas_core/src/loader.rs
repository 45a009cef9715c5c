//! Component Loader
//!
//! Opens a library, resolves the attach/detach entry points and keeps the
//! component they produce. A loaded component is always detached before its
//! library is closed.

use std::collections::BTreeMap;
use std::ffi::c_void;
use std::ptr::NonNull;

use crate::component::{ATTACH_SYMBOL, Component, ComponentBox, DETACH_SYMBOL};
use crate::error::{CoreError, ErrorCollector};

/// Signature of the attach entry point
pub type AttachFn = unsafe extern "C" fn() -> *mut c_void;
/// Signature of the detach entry point
pub type DetachFn = unsafe extern "C" fn(*mut c_void);

/// An opened library exposing the component entry points
pub trait Library: Send {
    fn path(&self) -> &str;

    fn attach_fn(&self) -> Result<AttachFn, CoreError>;

    fn detach_fn(&self) -> Result<DetachFn, CoreError>;
}

/// Turns a configured path into an opened [`Library`]
pub trait LibraryOpener: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn Library>, CoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared libraries
// ─────────────────────────────────────────────────────────────────────────────

struct DynamicLibrary {
    path: String,
    library: libloading::Library,
}

impl DynamicLibrary {
    fn symbol<T: Copy>(&self, name: &str) -> Result<T, CoreError> {
        // SAFETY: T is one of the entry point types fixed by `declare_component!`.
        let symbol = unsafe { self.library.get::<T>(name.as_bytes()) };
        symbol.map(|s| *s).map_err(|e| CoreError::MissingSymbol {
            path: self.path.clone(),
            symbol: name.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Library for DynamicLibrary {
    fn path(&self) -> &str {
        &self.path
    }

    fn attach_fn(&self) -> Result<AttachFn, CoreError> {
        self.symbol::<AttachFn>(ATTACH_SYMBOL)
    }

    fn detach_fn(&self) -> Result<DetachFn, CoreError> {
        self.symbol::<DetachFn>(DETACH_SYMBOL)
    }
}

/// Opens shared libraries from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicLibraryOpener;

impl LibraryOpener for DynamicLibraryOpener {
    fn open(&self, path: &str) -> Result<Box<dyn Library>, CoreError> {
        // SAFETY: loading a component runs its initializers; components are trusted.
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| CoreError::LibraryOpen {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(DynamicLibrary {
            path: path.to_string(),
            library,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Linked-in components
// ─────────────────────────────────────────────────────────────────────────────

struct StaticLibrary {
    path: String,
    attach: AttachFn,
    detach: DetachFn,
}

impl Library for StaticLibrary {
    fn path(&self) -> &str {
        &self.path
    }

    fn attach_fn(&self) -> Result<AttachFn, CoreError> {
        Ok(self.attach)
    }

    fn detach_fn(&self) -> Result<DetachFn, CoreError> {
        Ok(self.detach)
    }
}

/// Resolves paths to components linked into the host, with an optional
/// fallback opener for everything else
#[derive(Default)]
pub struct StaticLibraryOpener {
    components: BTreeMap<String, (AttachFn, DetachFn)>,
    fallback: Option<Box<dyn LibraryOpener>>,
}

impl StaticLibraryOpener {
    /// Create an opener with no built-in components and no fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `path` to the given entry points
    pub fn with_component(mut self, path: impl Into<String>, attach: AttachFn, detach: DetachFn) -> Self {
        self.components.insert(path.into(), (attach, detach));
        self
    }

    /// Open every other path with `opener`
    pub fn with_fallback(mut self, opener: impl LibraryOpener + 'static) -> Self {
        self.fallback = Some(Box::new(opener));
        self
    }
}

impl LibraryOpener for StaticLibraryOpener {
    fn open(&self, path: &str) -> Result<Box<dyn Library>, CoreError> {
        if let Some((attach, detach)) = self.components.get(path) {
            return Ok(Box::new(StaticLibrary {
                path: path.to_string(),
                attach: *attach,
                detach: *detach,
            }));
        }
        match &self.fallback {
            Some(fallback) => fallback.open(path),
            None => Err(CoreError::LibraryOpen {
                path: path.to_string(),
                reason: "no such built-in component".to_string(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Component Loader
// ─────────────────────────────────────────────────────────────────────────────

struct LoadedComponent {
    component: NonNull<ComponentBox>,
    detach: DetachFn,
    // dropped after `Drop::drop` has detached the component
    _library: Box<dyn Library>,
}

// SAFETY: the pointee is a `Box<dyn Component>` and `Component: Send`.
unsafe impl Send for LoadedComponent {}

impl Drop for LoadedComponent {
    fn drop(&mut self) {
        // SAFETY: the pointer came from this library's attach function and is
        // handed back exactly once.
        unsafe { (self.detach)(self.component.as_ptr().cast()) };
    }
}

/// One configured component path and what was loaded from it
pub struct ComponentLoader {
    path: String,
    loaded: Option<LoadedComponent>,
}

impl ComponentLoader {
    /// Create a loader for `path`; nothing is opened yet
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            loaded: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a component is attached
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Open the library and attach its component. On any failure nothing
    /// stays loaded.
    pub fn load(&mut self, opener: &dyn LibraryOpener, ec: &mut dyn ErrorCollector) -> bool {
        if self.loaded.is_some() {
            return true;
        }

        let library = match opener.open(&self.path) {
            Ok(library) => library,
            Err(e) => {
                tracing::error!(path = %self.path, error = %e, "Could not open library");
                ec.add_error(&e);
                return false;
            }
        };

        let (attach, detach) = match (library.attach_fn(), library.detach_fn()) {
            (Ok(attach), Ok(detach)) => (attach, detach),
            (attach, detach) => {
                for e in [attach.err(), detach.err()].into_iter().flatten() {
                    tracing::error!(path = %self.path, error = %e, "Missing entry point");
                    ec.add_error(&e);
                }
                return false;
            }
        };

        // SAFETY: entry point contract of `declare_component!`.
        let raw = unsafe { attach() };
        let Some(component) = NonNull::new(raw.cast::<ComponentBox>()) else {
            let e = CoreError::NoEntrance(self.path.clone());
            tracing::error!(path = %self.path, "{}", e);
            ec.add_error(&e);
            return false;
        };

        self.loaded = Some(LoadedComponent {
            component,
            detach,
            _library: library,
        });
        true
    }

    /// Detach the component and close the library; no-op when not loaded
    pub fn unload(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            tracing::debug!(path = %self.path, "Unloading component");
            drop(loaded);
        }
    }

    /// The attached component, if any
    pub fn component(&self) -> Option<&dyn Component> {
        self.loaded.as_ref().map(|loaded| {
            // SAFETY: valid until the component is detached in `unload`.
            let boxed: &ComponentBox = unsafe { loaded.component.as_ref() };
            boxed.as_ref()
        })
    }
}

impl Drop for ComponentLoader {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Application;
    use crate::error::{ErrorList, codes};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Sample;

    impl Component for Sample {
        fn name(&self) -> &str {
            "sample"
        }

        fn version(&self) -> &str {
            "0.1"
        }

        fn init(&self, _app: &Arc<Application>, _ec: &mut dyn ErrorCollector) -> bool {
            true
        }
    }

    static SAMPLE_DETACHED: AtomicUsize = AtomicUsize::new(0);
    static PARTIAL_ATTACHED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn attach_sample() -> *mut c_void {
        let component: ComponentBox = Box::new(Sample);
        Box::into_raw(Box::new(component)).cast()
    }

    unsafe extern "C" fn detach_sample(component: *mut c_void) {
        SAMPLE_DETACHED.fetch_add(1, Ordering::SeqCst);
        drop(unsafe { Box::from_raw(component.cast::<ComponentBox>()) });
    }

    unsafe extern "C" fn attach_counted() -> *mut c_void {
        PARTIAL_ATTACHED.fetch_add(1, Ordering::SeqCst);
        std::ptr::null_mut()
    }

    unsafe extern "C" fn attach_null() -> *mut c_void {
        std::ptr::null_mut()
    }

    unsafe extern "C" fn detach_noop(_component: *mut c_void) {}

    /// Library that only exports the attach symbol
    struct AttachOnly;

    impl Library for AttachOnly {
        fn path(&self) -> &str {
            "attach-only"
        }

        fn attach_fn(&self) -> Result<AttachFn, CoreError> {
            Ok(attach_counted)
        }

        fn detach_fn(&self) -> Result<DetachFn, CoreError> {
            Err(CoreError::MissingSymbol {
                path: "attach-only".into(),
                symbol: DETACH_SYMBOL.into(),
                reason: "undefined symbol".into(),
            })
        }
    }

    struct AttachOnlyOpener;

    impl LibraryOpener for AttachOnlyOpener {
        fn open(&self, _path: &str) -> Result<Box<dyn Library>, CoreError> {
            Ok(Box::new(AttachOnly))
        }
    }

    #[test]
    fn test_load_and_unload() {
        let opener = StaticLibraryOpener::new().with_component("builtin:sample", attach_sample, detach_sample);
        let mut loader = ComponentLoader::new("builtin:sample");
        let mut ec = ErrorList::new();
        assert!(loader.load(&opener, &mut ec));
        assert_eq!(loader.component().map(|c| c.name()), Some("sample"));

        let before = SAMPLE_DETACHED.load(Ordering::SeqCst);
        loader.unload();
        assert!(!loader.is_loaded());
        assert!(loader.component().is_none());
        assert_eq!(SAMPLE_DETACHED.load(Ordering::SeqCst), before + 1);

        loader.unload();
        assert_eq!(SAMPLE_DETACHED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_missing_detach_never_attaches() {
        let mut loader = ComponentLoader::new("attach-only");
        let mut ec = ErrorList::new();
        assert!(!loader.load(&AttachOnlyOpener, &mut ec));
        assert!(ec.contains_code(codes::MISSING_SYMBOL));
        assert_eq!(PARTIAL_ATTACHED.load(Ordering::SeqCst), 0);
        assert!(loader.component().is_none());
        loader.unload();
    }

    #[test]
    fn test_null_entrance_is_reported() {
        let opener = StaticLibraryOpener::new().with_component("builtin:null", attach_null, detach_noop);
        let mut loader = ComponentLoader::new("builtin:null");
        let mut ec = ErrorList::new();
        assert!(!loader.load(&opener, &mut ec));
        assert!(ec.contains_code(codes::NO_ENTRANCE));
        assert!(!loader.is_loaded());
    }

    #[test]
    fn test_unknown_path_fails_to_open() {
        let opener = StaticLibraryOpener::new().with_fallback(DynamicLibraryOpener);
        let mut loader = ComponentLoader::new("/nonexistent/libnothing.so");
        let mut ec = ErrorList::new();
        assert!(!loader.load(&opener, &mut ec));
        assert!(ec.contains_code(codes::LIBRARY_OPEN));
    }
}
