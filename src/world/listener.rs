use std::sync::{Arc, Mutex};

/// Output sink attached to a thing by the session layer. Things with a
/// listener hear descriptons; things without one react to them instead.
pub trait Listener: Send {
    fn output(&mut self, text: &str);

    fn is_admin(&self) -> bool {
        false
    }

    /// Verbose viewers see thing ids next to names.
    fn is_verbose(&self) -> bool {
        false
    }
}

/// Listener collecting lines in memory. Clones share the buffer, so a caller
/// can keep one handle and attach the other to the world.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    lines: Arc<Mutex<Vec<String>>>,
    admin: bool,
    verbose: bool,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admin() -> Self {
        Self {
            admin: true,
            ..Self::default()
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Drain everything received so far.
    pub fn take(&self) -> Vec<String> {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *lines)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether any received line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl Listener for OutputBuffer {
    fn output(&mut self, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
    }

    fn is_admin(&self) -> bool {
        self.admin
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}
