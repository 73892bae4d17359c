//! Descriptor wiring for a spawned peer process.
//!
//! The child is contracted to find its MIDI input on one fixed descriptor slot
//! and its MIDI output on another. The parent allocates one pipe per requested
//! direction, keeps its own ends (close-on-exec), and between fork and exec
//! duplicates the child's ends onto the slots. The child's ends are closed in
//! the parent once the child is running so end-of-stream is observable on
//! both sides.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::pipe::{pipe, set_cloexec_raw, ReadEnd, WriteEnd};

/// Which byte directions the child takes part in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Directions {
    /// The child reads MIDI bytes produced by the bridge.
    pub child_reads: bool,
    /// The child writes MIDI bytes consumed by the bridge.
    pub child_writes: bool,
}

impl Directions {
    pub const BOTH: Self = Self {
        child_reads: true,
        child_writes: true,
    };
}

/// Descriptor numbers the child expects its MIDI pipes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildSlots {
    pub input: RawFd,
    pub output: RawFd,
}

impl Default for ChildSlots {
    fn default() -> Self {
        Self {
            input: 0,
            output: 1,
        }
    }
}

/// One `dup2(from, to)` performed in the child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dup {
    pub from: RawFd,
    pub to: RawFd,
}

/// Ordered duplication steps, at most one per direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DupPlan {
    steps: [Option<Dup>; 2],
}

impl DupPlan {
    pub fn steps(&self) -> impl Iterator<Item = Dup> + '_ {
        self.steps.iter().flatten().copied()
    }

    fn apply(&self) -> io::Result<()> {
        for dup in self.steps() {
            if dup.from == dup.to {
                // dup2 onto itself is a no-op and would leave FD_CLOEXEC set.
                set_cloexec_raw(dup.to, false)?;
                continue;
            }
            // SAFETY: dup2 is async-signal-safe; both numbers are plain integers.
            if unsafe { libc::dup2(dup.from, dup.to) } < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

/// Order the input and output duplications so no step overwrites a
/// descriptor that a later step still reads from.
///
/// Input is duplicated first unless its target slot is the very descriptor
/// the output step reads from, in which case the output step goes first.
/// Cyclic assignments (each source sitting on the other's slot) cannot be
/// fixed by ordering and must be relocated beforehand.
pub fn dup_order(input: Option<Dup>, output: Option<Dup>) -> DupPlan {
    match (input, output) {
        (Some(i), Some(o)) if i.to == o.from => {
            debug_assert!(o.to != i.from, "cyclic descriptor assignment");
            DupPlan {
                steps: [Some(o), Some(i)],
            }
        }
        (i, o) => DupPlan { steps: [i, o] },
    }
}

/// The parent's side of the wiring once the child is running.
#[derive(Debug, Default)]
pub struct ParentEnds {
    /// Bytes written here arrive on the child's input slot.
    pub to_child: Option<WriteEnd>,
    /// Bytes the child writes on its output slot arrive here.
    pub from_child: Option<ReadEnd>,
}

/// Pipes allocated for a child that has not been spawned yet.
#[derive(Debug)]
pub struct ChildWiring {
    parent: ParentEnds,
    child_input: Option<ReadEnd>,
    child_output: Option<WriteEnd>,
    slots: ChildSlots,
}

impl ChildWiring {
    /// Allocate one pipe per requested direction.
    pub fn new(directions: Directions, slots: ChildSlots) -> Result<Self> {
        if !directions.child_reads && !directions.child_writes {
            return Err(TransportError::NoDirection);
        }
        if directions.child_reads && directions.child_writes && slots.input == slots.output {
            return Err(TransportError::SlotConflict(slots.input));
        }

        let mut parent = ParentEnds::default();
        let mut child_input = None;
        let mut child_output = None;

        if directions.child_reads {
            let (read, write) = pipe()?;
            child_input = Some(read);
            parent.to_child = Some(write);
        }
        if directions.child_writes {
            let (read, write) = pipe()?;
            parent.from_child = Some(read);
            child_output = Some(write);
        }

        let cyclic = match (&child_input, &child_output) {
            (Some(input), Some(output)) => {
                input.as_raw_fd() == slots.output && output.as_raw_fd() == slots.input
            }
            _ => false,
        };
        if cyclic {
            let above = slots.input.max(slots.output) + 1;
            child_input = child_input
                .take()
                .map(|end| end.relocate_above(above))
                .transpose()?;
        }

        Ok(Self {
            parent,
            child_input,
            child_output,
            slots,
        })
    }

    /// The duplication steps the child will perform before exec.
    pub fn plan(&self) -> DupPlan {
        let input = self.child_input.as_ref().map(|end| Dup {
            from: end.as_raw_fd(),
            to: self.slots.input,
        });
        let output = self.child_output.as_ref().map(|end| Dup {
            from: end.as_raw_fd(),
            to: self.slots.output,
        });
        dup_order(input, output)
    }

    /// Spawn `command` with the child's pipe ends on their slots.
    ///
    /// The child's ends are closed in the parent before returning.
    pub fn spawn(self, command: &mut Command) -> Result<(Child, ParentEnds)> {
        let plan = self.plan();
        debug!(?plan, "child descriptor plan");

        // SAFETY: the hook runs between fork and exec and only calls dup2 and
        // fcntl, which are async-signal-safe; it does not allocate.
        unsafe {
            command.pre_exec(move || plan.apply());
        }

        let child = command.spawn().map_err(|source| TransportError::Spawn {
            program: command.get_program().to_string_lossy().into_owned(),
            source,
        })?;
        info!(pid = child.id(), slots = ?self.slots, "spawned child");

        drop(self.child_input);
        drop(self.child_output);
        Ok((child, self.parent))
    }
}
