//! Progress bars for batch embedding. Compiled to no-ops without the
//! `progress` feature.

use notegraph::ProgressCallback;

#[cfg(feature = "progress")]
pub struct Progress {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "progress")]
impl Progress {
    pub fn new(total: usize, message: &str) -> Self {
        use indicatif::{ProgressBar, ProgressStyle};

        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        bar.set_style(style);
        bar.set_message(message.to_string());
        Self { bar }
    }

    /// Callback that moves the bar; the library reports fractions of `total`.
    pub fn callback(&self) -> Option<ProgressCallback> {
        let bar = self.bar.clone();
        let total = self.bar.length().unwrap_or(0) as f32;
        Some(std::sync::Arc::new(move |msg: String, fraction: f32| {
            bar.set_message(msg);
            bar.set_position((fraction * total).floor() as u64);
        }))
    }

    pub fn finish(&self, message: String) {
        self.bar.finish_with_message(message);
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

#[cfg(not(feature = "progress"))]
pub struct Progress;

#[cfg(not(feature = "progress"))]
impl Progress {
    pub fn new(_total: usize, _message: &str) -> Self {
        Self
    }

    pub fn callback(&self) -> Option<ProgressCallback> {
        None
    }

    pub fn finish(&self, message: String) {
        eprintln!("{message}");
    }

    pub fn abandon(&self) {}
}
