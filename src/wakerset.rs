use std::{collections::HashMap, default::Default, mem, num::NonZeroUsize, task::Waker};

#[derive(Debug, Eq, PartialEq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    fn duplicate(&self) -> Token {
        Token(self.0)
    }
}

/// Data structure for managing a collection of wakers that are all interested
/// in a single shared batch. It is designed so that only a single task, the
/// "driving" task, does the work of polling the batch window and the
/// executor future; the other tasks sleep until the batch settles, or until
/// the driver is dropped and one of them has to take over.
///
/// Wakers are registered with a token, which the owning future keeps and
/// uses to refresh its waker on later polls and to discard itself on drop.
/// These tokens cannot be cloned or otherwise duplicated; this helps to ensure
/// that their lifespan are correctly associated with a particular future.
///
/// The first registered waker becomes the driver. If the driving waker is
/// discarded, another is promoted and awoken immediately, so the shared batch
/// always has a path forward as long as any future is still interested.
#[derive(Debug)]
pub(crate) struct WakerSet {
    wakers: HashMap<Token, Waker>,
    driving_waker: Option<Token>,

    // Tokens are an ever-increasing integer. We assume that WakerSets are
    // relatively short-lived and that there's no chance of running out of
    // these.
    next_token: NonZeroUsize,
}

impl Default for WakerSet {
    fn default() -> Self {
        Self {
            wakers: HashMap::with_capacity(1),
            next_token: NonZeroUsize::MIN,
            driving_waker: None,
        }
    }
}

impl WakerSet {
    /// Register the waker of a future that is about to return Pending. If the
    /// future has no token yet, one is created and stored in `token`;
    /// otherwise the stored waker is refreshed.
    ///
    /// Returns true if this future is the driver (which it becomes if there
    /// is currently no driver).
    pub(crate) fn register(&mut self, token: &mut Option<Token>, waker: &Waker) -> bool {
        let existing = token
            .as_ref()
            .filter(|current| self.wakers.contains_key(*current))
            .map(Token::duplicate);

        let current = match existing {
            Some(current) => {
                if let Some(stored) = self.wakers.get_mut(&current) {
                    if !stored.will_wake(waker) {
                        stored.clone_from(waker);
                    }
                }
                current
            }
            None => {
                let new_token = self.add_waker(waker.clone());
                *token = Some(new_token.duplicate());
                new_token
            }
        };

        if self.driving_waker.is_none() {
            self.driving_waker = Some(current.duplicate());
        }

        self.driving_waker.as_ref() == Some(&current)
    }

    fn add_waker(&mut self, waker: Waker) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);

        self.wakers.insert(token.duplicate(), waker);
        token
    }

    /// Wake the driving waker, if there is one. Used when something other
    /// than the driver decides that the batch should make progress.
    pub(crate) fn wake_driver(&self) {
        if let Some(waker) = self
            .driving_waker
            .as_ref()
            .and_then(|token| self.wakers.get(token))
        {
            waker.wake_by_ref();
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker (or there is currently no driving waker), an arbitrary waker is
    /// made the current driving waker and awoken.
    ///
    /// We create a new driving waker immediately because if a series of drops
    /// happen at the same time we need to ensure that at least one non-dropped
    /// waker is awoken.
    pub(crate) fn discard_and_wake(&mut self, token: Token) {
        self.wakers.remove(&token);
        if self.driving_waker.as_ref() == Some(&token) || self.driving_waker.is_none() {
            match self.wakers.iter().next() {
                None => self.driving_waker = None,
                Some((token, waker)) => {
                    self.driving_waker = Some(token.duplicate());
                    waker.wake_by_ref();
                }
            }
        }
    }

    /// Wake every waker except the one associated with `finished` (the
    /// future that is about to return Ready itself), emptying the set.
    pub(crate) fn wake_all_except(&mut self, finished: Option<Token>) {
        let wakers = mem::take(&mut self.wakers);
        self.driving_waker = None;

        wakers
            .into_iter()
            .filter(|(token, _waker)| Some(token) != finished.as_ref())
            .for_each(|(_token, waker)| waker.wake());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.wakers.len()
    }
}
