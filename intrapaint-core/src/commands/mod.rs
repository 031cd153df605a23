//! # Commands
//!
//! Commands are plain data describing one reversible change to some state, carrying enough
//! information to be applied in either direction. State types that understand a command implement
//! [`CommandConsumer`]; the [`crate::undo`] log replays them forwards and backwards.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command constructed for a state that does not match the current state")]
    MismatchedState,
    #[error("resource referenced by the command is not found")]
    UnknownResource,
}

pub trait CommandConsumer<C> {
    /// Apply a single command. If this generates an error,
    /// the state of `self` should *not* be observably changed.
    fn apply(&mut self, command: DoUndo<'_, C>) -> Result<(), CommandError>;
}

#[derive(PartialEq, Eq, Debug)]
pub enum DoUndo<'c, T> {
    Do(&'c T),
    Undo(&'c T),
}
impl<T> Clone for DoUndo<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for DoUndo<'_, T> {}
impl<'c, T> DoUndo<'c, T> {
    /// Same command, opposite direction.
    #[must_use]
    pub fn inverted(self) -> Self {
        match self {
            Self::Do(c) => Self::Undo(c),
            Self::Undo(c) => Self::Do(c),
        }
    }
    #[must_use]
    pub fn command(&self) -> &'c T {
        match self {
            Self::Do(c) | Self::Undo(c) => c,
        }
    }
    #[must_use]
    pub fn is_undo(&self) -> bool {
        matches!(self, Self::Undo(_))
    }
}

/// Apply a scope of commands atomically: in order for `Do`, reversed for `Undo`.
/// If any member fails, the members already applied are reverted and the error is returned.
pub fn apply_scope<C, Consumer>(
    consumer: &mut Consumer,
    commands: &[C],
    undo: bool,
) -> Result<(), CommandError>
where
    Consumer: CommandConsumer<C> + ?Sized,
{
    let wrap = |c| if undo { DoUndo::Undo(c) } else { DoUndo::Do(c) };
    let order: Box<dyn Iterator<Item = &C> + '_> = if undo {
        Box::new(commands.iter().rev())
    } else {
        Box::new(commands.iter())
    };
    let mut applied: smallvec::SmallVec<[&C; 4]> = smallvec::SmallVec::new();
    for command in order {
        if let Err(err) = consumer.apply(wrap(command)) {
            for done in applied.into_iter().rev() {
                if let Err(rollback) = consumer.apply(wrap(done).inverted()) {
                    // Nothing sane left to do, the state no longer matches history.
                    log::error!("Failed to roll back partially applied scope: {rollback}");
                }
            }
            return Err(err);
        }
        applied.push(command);
    }
    Ok(())
}
