//! A fault-tolerant pull iterator (§4.3, §9).
//!
//! The source repository uses exceptions to skip over items that fail a
//! per-item transform; the idiomatic Rust shape of that is a plain
//! `Iterator` whose `next()` keeps pulling from the inner sequence until it
//! produces a transformed item or the inner sequence is exhausted, reporting
//! every failure through caller-supplied callbacks instead of unwinding.

/// Callbacks fired around each item's transform. All are optional; a caller
/// that only cares about statistics only needs `on_error`.
#[derive(Default)]
pub struct EnumeratorHooks<'a, T> {
    pub before_advance: Option<Box<dyn FnMut() + 'a>>,
    pub cancel_advance: Option<Box<dyn FnMut() + 'a>>,
    pub on_error: Option<Box<dyn FnMut(&anyhow::Error) + 'a>>,
    pub on_success: Option<Box<dyn FnMut(&T) + 'a>>,
}

impl<'a, T> EnumeratorHooks<'a, T> {
    pub fn new() -> Self {
        Self {
            before_advance: None,
            cancel_advance: None,
            on_error: None,
            on_success: None,
        }
    }

    pub fn before_advance(mut self, f: impl FnMut() + 'a) -> Self {
        self.before_advance = Some(Box::new(f));
        self
    }

    pub fn cancel_advance(mut self, f: impl FnMut() + 'a) -> Self {
        self.cancel_advance = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&anyhow::Error) + 'a) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl FnMut(&T) + 'a) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }
}

/// Wraps an input iterator and a fallible transform so that a failing item
/// is captured, reported through `hooks`, and does not abort the stream.
///
/// Ordering of the underlying sequence is preserved; the enumerator stops
/// either when the input is exhausted or once `max_items` outputs have been
/// produced.
pub struct RobustEnumerator<'a, I, S, T, F>
where
    I: Iterator<Item = S>,
    F: FnMut(S) -> anyhow::Result<T>,
{
    input: I,
    transform: F,
    hooks: EnumeratorHooks<'a, T>,
    max_items: Option<usize>,
    produced: usize,
}

impl<'a, I, S, T, F> RobustEnumerator<'a, I, S, T, F>
where
    I: Iterator<Item = S>,
    F: FnMut(S) -> anyhow::Result<T>,
{
    pub fn new(input: I, transform: F) -> Self {
        Self {
            input,
            transform,
            hooks: EnumeratorHooks::new(),
            max_items: None,
            produced: 0,
        }
    }

    pub fn with_hooks(mut self, hooks: EnumeratorHooks<'a, T>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }
}

impl<'a, I, S, T, F> Iterator for RobustEnumerator<'a, I, S, T, F>
where
    I: Iterator<Item = S>,
    F: FnMut(S) -> anyhow::Result<T>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if let Some(max) = self.max_items {
            if self.produced >= max {
                return None;
            }
        }

        loop {
            if let Some(before) = self.hooks.before_advance.as_mut() {
                before();
            }

            let item = match self.input.next() {
                Some(item) => item,
                None => return None,
            };

            match (self.transform)(item) {
                Ok(value) => {
                    if let Some(on_success) = self.hooks.on_success.as_mut() {
                        on_success(&value);
                    }
                    self.produced += 1;
                    return Some(value);
                },
                Err(err) => {
                    if let Some(cancel) = self.hooks.cancel_advance.as_mut() {
                        cancel();
                    }
                    if let Some(on_error) = self.hooks.on_error.as_mut() {
                        on_error(&err);
                    }
                    // Continue the loop: this item is skipped, the stream
                    // carries on with the next one.
                },
            }
        }
    }
}

/// Wires the indexing counters described in §4.3: increments attempts
/// before each item, decrements and records a failure on error.
pub fn indexing_hooks<'a, T>(
    stats: &'a dyn crate::config::StorageActions,
    ctx: &'a crate::config::WorkContext,
    index_name: &'a str,
) -> EnumeratorHooks<'a, T> {
    EnumeratorHooks::new()
        .before_advance(move || stats.increment_indexing_attempt())
        .on_error(move |err| {
            stats.decrement_indexing_attempt();
            stats.increment_indexing_failure();
            ctx.add_error(index_name, None, "", err);
        })
}

/// The reduce-phase analogue of [`indexing_hooks`].
pub fn reduce_hooks<'a, T>(
    stats: &'a dyn crate::config::StorageActions,
    ctx: &'a crate::config::WorkContext,
    index_name: &'a str,
) -> EnumeratorHooks<'a, T> {
    EnumeratorHooks::new()
        .before_advance(move || stats.increment_reduce_attempt())
        .on_error(move |err| {
            stats.decrement_reduce_attempt();
            stats.increment_reduce_failure();
            ctx.add_error(index_name, None, "", err);
        })
}

/// Used during map-phase reduction: records no statistics at all.
pub fn silent_hooks<'a, T>() -> EnumeratorHooks<'a, T> {
    EnumeratorHooks::new()
}
