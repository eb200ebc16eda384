use std::ffi::OsString;
use std::path::PathBuf;

/// Default output path; the sampling library also starts itself when set.
pub const OUTPUT_PATH_VAR: &str = "CPUPROFILE";
/// Requests allocation tracing together with CPU sampling.
pub const TRACE_OBJECTS_VAR: &str = "CPUPROFILE_OBJECTS";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Configuration {
    pub output_path: Option<PathBuf>,
    pub trace_objects: bool,
}

impl Configuration {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let mut configuration = Self::default();
        for (key, value) in vars {
            let key = key.into();
            if key == OUTPUT_PATH_VAR {
                // Presence counts, even when empty.
                configuration.output_path = Some(PathBuf::from(value.into()));
            } else if key == TRACE_OBJECTS_VAR {
                configuration.trace_objects = true;
            }
        }
        configuration
    }

    /// Whether allocation tracing should begin at load, alongside the
    /// sampling library's own start.
    pub fn autostart_object_tracing(&self) -> bool {
        self.output_path.is_some() && self.trace_objects
    }
}
