// Component - the unit a shared library contributes to the host

use std::sync::Arc;

use tracing::Dispatch;

use crate::application::Application;
use crate::error::ErrorCollector;

/// Symbol of the factory that creates a library's component
pub const ATTACH_SYMBOL: &str = "__sas_attach_component";

/// Symbol of the matching destructor
pub const DETACH_SYMBOL: &str = "__sas_detach_component";

/// What a library contributes to the host
pub trait Component: Send {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Route this component's log events to the host subscriber.
    ///
    /// A component built as a shared library carries its own copy of
    /// `tracing`, whose global dispatcher is unset. This body is compiled into
    /// the component, so it installs `dispatch` in that copy. A linked-in
    /// component shares the host's copy, where a global default is usually
    /// set already and the call is ignored.
    fn adopt_dispatch(&self, dispatch: &Dispatch) {
        if tracing::dispatcher::set_global_default(dispatch.clone()).is_ok() {
            tracing::debug!(component = %self.name(), "Using host log dispatcher");
        }
    }

    /// One-time setup; typically registers objects and interfaces with `app`
    fn init(&self, app: &Arc<Application>, ec: &mut dyn ErrorCollector) -> bool;
}

/// What the attach symbol hands over, behind a thin pointer
pub type ComponentBox = Box<dyn Component>;

/// Export the attach/detach entry points for a component type.
///
/// ```ignore
/// sas_core::declare_component!(MyComponent::new());
/// ```
#[macro_export]
macro_rules! declare_component {
    ($ctor:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn __sas_attach_component() -> *mut ::std::ffi::c_void {
            let component: $crate::component::ComponentBox = ::std::boxed::Box::new($ctor);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(component)).cast()
        }

        /// # Safety
        ///
        /// `component` must come from `__sas_attach_component` of this library.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn __sas_detach_component(component: *mut ::std::ffi::c_void) {
            if !component.is_null() {
                // SAFETY: produced by Box::into_raw in the attach function above.
                drop(unsafe {
                    ::std::boxed::Box::from_raw(component.cast::<$crate::component::ComponentBox>())
                });
            }
        }
    };
}
