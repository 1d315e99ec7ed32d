use crate::router::RouterId;
use oxrdf::NamedNode;
use spargebra::term::TriplePattern;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The window declared on a `STREAM` clause.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Window {
    /// `[RANGE width SLIDE slide]`: the triples that arrived during the last `width`.
    ///
    /// Without `slide` the window moves on every arrival.
    Range {
        width: Duration,
        slide: Option<Duration>,
    },
    /// `[TRIPLES n]`: the last `n` triples.
    Triples(usize),
    /// `[NOW]`: only the triples arriving at the current instant.
    Now,
    /// `[ALL]`: every triple received since registration.
    All,
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { width, slide } => {
                write!(f, "[RANGE {}ms", width.as_millis())?;
                if let Some(slide) = slide {
                    write!(f, " SLIDE {}ms", slide.as_millis())?;
                }
                f.write_str("]")
            }
            Self::Triples(count) => write!(f, "[TRIPLES {count}]"),
            Self::Now => f.write_str("[NOW]"),
            Self::All => f.write_str("[ALL]"),
        }
    }
}

/// Everything a [`WindowEngine`] needs to maintain the contents of one window.
#[derive(Debug, Clone, Copy)]
pub struct WindowRegistration<'a> {
    /// The stream the triples are read from.
    pub graph: &'a NamedNode,
    /// The pattern the stream triples must match.
    pub pattern: &'a TriplePattern,
    /// The window declared in the query.
    pub window: &'a Window,
    /// How many matching triples the subscription keeps (1 means "keep the last one").
    pub retention: usize,
}

/// Identifies a window subscription inside a [`WindowEngine`].
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub struct WindowHandle(u64);

impl WindowHandle {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// The event-processing substrate maintaining the current contents of windows.
///
/// The engine pushes one event per new or expiring matching triple to the subscriber router.
/// After [`unregister_window`](Self::unregister_window) returns, no event must be in flight for the handle anymore.
pub trait WindowEngine {
    /// Error returned when a subscription is rejected.
    type Error: Error + Send + Sync + 'static;

    /// Starts maintaining a window and delivering its events to `subscriber`.
    fn register_window(
        &self,
        registration: WindowRegistration<'_>,
        subscriber: RouterId,
    ) -> Result<WindowHandle, Self::Error>;

    /// Stops a subscription.
    fn unregister_window(&self, handle: WindowHandle);
}

impl<T: WindowEngine + ?Sized> WindowEngine for Arc<T> {
    type Error = T::Error;

    #[inline]
    fn register_window(
        &self,
        registration: WindowRegistration<'_>,
        subscriber: RouterId,
    ) -> Result<WindowHandle, Self::Error> {
        (**self).register_window(registration, subscriber)
    }

    #[inline]
    fn unregister_window(&self, handle: WindowHandle) {
        (**self).unregister_window(handle);
    }
}
