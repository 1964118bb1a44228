pub mod drive;

pub use drive::{DriveConfig, DriveOdometry, DriveSubsystem};

use crate::command::CommandError;
use crate::hal::ActuatorChannel;
use crate::scheduler::SchedulerError;
use core::fmt;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

pub const MAX_SUBSYSTEMS: usize = 16;
pub const MAX_REQUIREMENTS: usize = 4;

static_assertions::const_assert!(MAX_SUBSYSTEMS <= u8::MAX as usize);
static_assertions::const_assert!(MAX_REQUIREMENTS <= MAX_SUBSYSTEMS);

/// Registration slot of a subsystem inside one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubsystemId(u8);

impl SubsystemId {
    pub(crate) const fn new(index: u8) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subsystem#{}", self.0)
    }
}

/// Long-lived owner of a group of actuator channels.
pub trait Subsystem {
    fn name(&self) -> &'static str;

    /// Channels this subsystem writes. No two registered subsystems may
    /// share a channel.
    fn actuators(&self) -> &[ActuatorChannel] {
        &[]
    }

    /// Runs once per cycle after the hardware read and before any command.
    /// Must read sensors through the cached snapshot only.
    fn periodic(&mut self) {}
}

/// Typed, shareable reference to a registered subsystem.
pub struct SubsystemHandle<S: ?Sized> {
    id: SubsystemId,
    inner: Rc<RefCell<S>>,
}

impl<S: ?Sized> SubsystemHandle<S> {
    pub(crate) fn new(id: SubsystemId, inner: Rc<RefCell<S>>) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> SubsystemId {
        self.id
    }

    pub fn borrow(&self) -> Ref<'_, S> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, S> {
        self.inner.borrow_mut()
    }

    /// Non-panicking `borrow` for use inside command lifecycle methods.
    ///
    /// # Errors
    /// `CommandError::SubsystemBusy` while a mutable borrow is alive.
    pub fn try_borrow(&self) -> Result<Ref<'_, S>, CommandError> {
        self.inner.try_borrow().map_err(|_| CommandError::SubsystemBusy(self.id))
    }

    /// # Errors
    /// `CommandError::SubsystemBusy` while any other borrow is alive.
    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, S>, CommandError> {
        self.inner.try_borrow_mut().map_err(|_| CommandError::SubsystemBusy(self.id))
    }
}

impl<S: ?Sized> Clone for SubsystemHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: ?Sized> fmt::Debug for SubsystemHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemHandle").field("id", &self.id).finish()
    }
}

/// Requirement set of a command. Duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubsystemSet(Vec<SubsystemId, MAX_REQUIREMENTS>);

impl SubsystemSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn of(id: SubsystemId) -> Self {
        let mut set = Self::new();
        let _ = set.0.push(id);
        set
    }

    /// # Errors
    /// `SchedulerError::TooManyRequirements` when more than
    /// `MAX_REQUIREMENTS` distinct subsystems are listed.
    pub fn from_ids(ids: &[SubsystemId]) -> Result<Self, SchedulerError> {
        let mut set = Self::new();
        for &id in ids {
            set.insert(id)?;
        }
        Ok(set)
    }

    /// # Errors
    /// `SchedulerError::TooManyRequirements` when the set is full.
    pub fn insert(&mut self, id: SubsystemId) -> Result<(), SchedulerError> {
        if self.contains(id) {
            return Ok(());
        }
        self.0.push(id).map_err(|_| SchedulerError::TooManyRequirements)
    }

    pub fn contains(&self, id: SubsystemId) -> bool {
        self.0.contains(&id)
    }

    pub fn intersects(&self, other: &SubsystemSet) -> bool {
        self.0.iter().any(|&id| other.contains(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = SubsystemId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
