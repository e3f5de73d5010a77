//! Progress messages from the many concurrent tasks, funnelled through a
//! single sink so the verbosity policy is applied in one place.

use failure::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// How chatty the user wants us to be.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verbosity {
    /// Only warnings and errors.
    Quiet,
    /// Summary lines, warnings and errors.
    Normal,
    /// Everything.
    Verbose,
}

impl Default for Verbosity {
    fn default() -> Verbosity {
        Verbosity::Normal
    }
}

/// Something a task wants the user to know about.
#[derive(Debug)]
pub enum Message {
    /// A status update. `terse` messages are summaries which get shown at
    /// normal verbosity, the rest only show up with `--verbose`.
    Info { text: String, terse: bool },
    Warning(String),
    /// A task failed. This never stops the rest of the run.
    Error(Error),
}

impl Message {
    /// Should this message be shown at the given verbosity?
    pub fn is_visible(&self, verbosity: Verbosity) -> bool {
        match (self, verbosity) {
            (&Message::Info { .. }, Verbosity::Quiet) => false,
            (&Message::Info { terse, .. }, Verbosity::Normal) => terse,
            _ => true,
        }
    }
}

/// A cheap handle for sending [`Message`]s to the sink.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: UnboundedSender<Message>,
}

/// Create a new [`Reporter`] and the receiving half to pass to [`sink()`].
pub fn channel() -> (Reporter, UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Reporter { tx }, rx)
}

impl Reporter {
    /// A summary line, shown unless `--quiet` was passed.
    pub fn info<S: Into<String>>(&self, text: S) {
        self.send(Message::Info {
            text: text.into(),
            terse: true,
        });
    }

    /// A detailed status update, only shown with `--verbose`.
    pub fn detail<S: Into<String>>(&self, text: S) {
        self.send(Message::Info {
            text: text.into(),
            terse: false,
        });
    }

    pub fn warning<S: Into<String>>(&self, text: S) {
        self.send(Message::Warning(text.into()));
    }

    pub fn error<E: Into<Error>>(&self, err: E) {
        self.send(Message::Error(err.into()));
    }

    fn send(&self, msg: Message) {
        if let Err(e) = self.tx.send(msg) {
            // The sink has already shut down, don't lose the message entirely
            debug!("Dropped a message after the sink closed: {:?}", e.0);
        }
    }
}

/// What the sink saw before every [`Reporter`] was dropped.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub warnings: usize,
    pub errors: usize,
}

/// Log every message which passes the verbosity filter, returning once all
/// [`Reporter`]s have been dropped.
pub async fn sink(
    mut rx: UnboundedReceiver<Message>,
    verbosity: Verbosity,
) -> SinkStats {
    let mut stats = SinkStats::default();

    while let Some(msg) = rx.recv().await {
        match msg {
            Message::Warning(_) => stats.warnings += 1,
            Message::Error(_) => stats.errors += 1,
            Message::Info { .. } => {},
        }

        if msg.is_visible(verbosity) {
            emit(msg);
        }
    }

    stats
}

fn emit(msg: Message) {
    match msg {
        Message::Info { text, .. } => info!("{}", text),
        Message::Warning(text) => warn!("{}", text),
        Message::Error(err) => {
            error!("{}", err);
            for cause in err.iter_causes() {
                error!("\tCaused By: {}", cause);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_policy() {
        let summary = Message::Info {
            text: String::from("found 3 repositories for alice"),
            terse: true,
        };
        let detail = Message::Info {
            text: String::from("downloaded alice/dotfiles"),
            terse: false,
        };
        let warning = Message::Warning(String::from("careful"));
        let error = Message::Error(failure::err_msg("oops"));

        assert!(!summary.is_visible(Verbosity::Quiet));
        assert!(!detail.is_visible(Verbosity::Quiet));
        assert!(warning.is_visible(Verbosity::Quiet));
        assert!(error.is_visible(Verbosity::Quiet));

        assert!(summary.is_visible(Verbosity::Normal));
        assert!(!detail.is_visible(Verbosity::Normal));

        assert!(summary.is_visible(Verbosity::Verbose));
        assert!(detail.is_visible(Verbosity::Verbose));
    }

    #[tokio::test]
    async fn the_sink_stops_when_every_reporter_is_dropped() {
        let (reporter, rx) = channel();
        let second = reporter.clone();

        reporter.info("hello");
        second.warning("watch out");
        reporter.error(failure::err_msg("broken"));
        second.error(failure::err_msg("also broken"));
        drop(reporter);
        drop(second);

        let stats = sink(rx, Verbosity::Quiet).await;

        assert_eq!(
            stats,
            SinkStats {
                warnings: 1,
                errors: 2,
            }
        );
    }
}
