use crate::error::Result;

use super::code_patcher::CodePatcher;
use super::trap_context::{TRAP_INSTRUCTION_LEN, TRAP_OPCODE};

/// Number of breakpoint locations taking turns over the routine's entry.
pub const TRAP_SLOT_COUNT: usize = 2;

/// The slot whose trap marks a new call into the routine.
pub const ARRIVAL_SLOT: usize = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrapSlot {
    pub location: usize,
    pub saved_byte: u8,
}

/// What the trap handler should do after consulting the rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapOutcome {
    /// The trap did not come from one of our slots, or its slot could not
    /// be restored. Execution continues past the trap untouched.
    Foreign,
    /// Slot `slot` was disarmed and the next one armed; execution must
    /// resume at `resume_at` to run the restored instruction.
    Advanced { slot: usize, resume_at: usize },
}

impl TrapOutcome {
    pub fn is_arrival(&self) -> bool {
        matches!(self, Self::Advanced { slot: ARRIVAL_SLOT, .. })
    }
}

/// A ring of breakpoint slots at `entry`, `entry + 1`, ...
///
/// While armed exactly one slot holds the trap opcode. Hitting slot `i`
/// restores it and arms slot `i + 1`, so a breakpoint stays live at one of
/// the two addresses throughout, and only the trap at the entry byte
/// counts as a call.
#[derive(Debug)]
pub struct TrapRotation {
    slots: [TrapSlot; TRAP_SLOT_COUNT],
}

impl TrapRotation {
    /// Saves the original bytes at the routine's entry. Nothing is written.
    pub fn capture<P: CodePatcher>(entry: usize, patcher: &P) -> Self {
        let slots = std::array::from_fn(|i| {
            let location = entry + i;
            TrapSlot {
                location,
                saved_byte: patcher.read_byte(location),
            }
        });
        Self { slots }
    }

    pub fn slots(&self) -> &[TrapSlot] {
        &self.slots
    }

    /// Arms the arrival slot.
    ///
    /// Every other slot is rewritten with its own saved byte first, so a
    /// location that cannot be patched fails here rather than inside the
    /// trap handler. Nothing stays modified on failure.
    pub fn arm<P: CodePatcher>(&self, patcher: &P) -> Result<()> {
        for slot in self.slots.iter().skip(1) {
            patcher.restore_byte(slot.location, slot.saved_byte)?;
        }
        patcher.patch_byte(self.slots[ARRIVAL_SLOT].location, TRAP_OPCODE)?;
        Ok(())
    }

    /// Restores every slot's original byte. Keeps going past failures and
    /// reports the first one.
    pub fn disarm<P: CodePatcher>(&self, patcher: &P) -> Result<()> {
        let mut result = Ok(());
        for slot in self.slots.iter() {
            if let Err(e) = patcher.restore_byte(slot.location, slot.saved_byte) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Advances the rotation for a trap reported at `instruction_pointer`
    /// (the address after the trapping instruction).
    ///
    /// Runs inside the trap handler: no allocation, bounded work. Every slot
    /// was proven patchable by `arm`, so writes are not expected to fail; if
    /// one does, at most one trap stays armed.
    pub fn on_trap<P: CodePatcher>(&self, patcher: &P, instruction_pointer: usize) -> TrapOutcome {
        let trapped_at = instruction_pointer.wrapping_sub(TRAP_INSTRUCTION_LEN);
        let Some(index) = self.slots.iter().position(|s| s.location == trapped_at) else {
            return TrapOutcome::Foreign;
        };

        let slot = &self.slots[index];
        let next = &self.slots[(index + 1) % TRAP_SLOT_COUNT];
        // Rewinding onto a byte that is still a trap would loop forever.
        if patcher.restore_byte(slot.location, slot.saved_byte).is_err() {
            return TrapOutcome::Foreign;
        }
        // Losing the next trap only stops counting; the code stays intact.
        let _ = patcher.patch_byte(next.location, TRAP_OPCODE);

        TrapOutcome::Advanced {
            slot: index,
            resume_at: slot.location,
        }
    }

    /// Number of slots currently holding something other than their
    /// original byte.
    pub fn armed_count<P: CodePatcher>(&self, patcher: &P) -> usize {
        self.slots
            .iter()
            .filter(|s| patcher.read_byte(s.location) != s.saved_byte)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::FakeCode;

    const NOP: u8 = 0x90;
    const RET: u8 = 0xc3;

    /// Executes `nop`/`ret` code from `entry` until `ret`, delivering traps
    /// to the rotation the way the kernel would. Returns the number of
    /// arrivals seen and checks the one-armed-trap invariant at each step.
    fn simulate_call(rotation: &TrapRotation, code: &FakeCode) -> usize {
        let mut pc = code.base;
        let mut arrivals = 0;
        loop {
            match code.byte(pc - code.base) {
                TRAP_OPCODE => {
                    let outcome = rotation.on_trap(code, pc + TRAP_INSTRUCTION_LEN);
                    let TrapOutcome::Advanced { resume_at, .. } = outcome else {
                        panic!("unexpected foreign trap at {:#x}", pc);
                    };
                    if outcome.is_arrival() {
                        arrivals += 1;
                    }
                    assert_eq!(rotation.armed_count(code), 1);
                    pc = resume_at;
                }
                NOP => pc += 1,
                RET => return arrivals,
                other => panic!("unexpected instruction {:#x}", other),
            }
        }
    }

    #[test]
    fn test_capture_saves_bytes_without_writing() {
        let code = FakeCode::new(&[NOP, 0x48, RET]);
        let rotation = TrapRotation::capture(code.base, &code);

        assert_eq!(
            rotation.slots(),
            &[
                TrapSlot {
                    location: code.base,
                    saved_byte: NOP,
                },
                TrapSlot {
                    location: code.base + 1,
                    saved_byte: 0x48,
                },
            ]
        );
        assert_eq!(code.snapshot(), vec![NOP, 0x48, RET]);
    }

    #[test]
    fn test_arm_sets_exactly_one_trap() {
        let code = FakeCode::new(&[NOP, NOP, RET]);
        let rotation = TrapRotation::capture(code.base, &code);
        rotation.arm(&code).unwrap();

        assert_eq!(code.snapshot(), vec![TRAP_OPCODE, NOP, RET]);
        assert_eq!(rotation.armed_count(&code), 1);
    }

    #[test]
    fn test_each_call_records_once() {
        for calls in [1, 2, 10] {
            let code = FakeCode::new(&[NOP, NOP, RET]);
            let rotation = TrapRotation::capture(code.base, &code);
            rotation.arm(&code).unwrap();

            let arrivals: usize = (0..calls).map(|_| simulate_call(&rotation, &code)).sum();

            assert_eq!(arrivals, calls);
            assert_eq!(rotation.armed_count(&code), 1);
            assert_eq!(code.byte(0), TRAP_OPCODE);
        }
    }

    #[test]
    fn test_on_trap_advances_rotation() {
        let code = FakeCode::new(&[NOP, NOP, RET]);
        let rotation = TrapRotation::capture(code.base, &code);
        rotation.arm(&code).unwrap();

        let outcome = rotation.on_trap(&code, code.base + 1);
        assert_eq!(
            outcome,
            TrapOutcome::Advanced {
                slot: 0,
                resume_at: code.base,
            }
        );
        assert!(outcome.is_arrival());
        assert_eq!(code.snapshot(), vec![NOP, TRAP_OPCODE, RET]);

        let outcome = rotation.on_trap(&code, code.base + 2);
        assert_eq!(
            outcome,
            TrapOutcome::Advanced {
                slot: 1,
                resume_at: code.base + 1,
            }
        );
        assert!(!outcome.is_arrival());
        assert_eq!(code.snapshot(), vec![TRAP_OPCODE, NOP, RET]);
    }

    #[test]
    fn test_foreign_trap_is_ignored() {
        let code = FakeCode::new(&[NOP, NOP, RET]);
        let rotation = TrapRotation::capture(code.base, &code);
        rotation.arm(&code).unwrap();
        let before = code.snapshot();

        assert_eq!(rotation.on_trap(&code, code.base + 3), TrapOutcome::Foreign);
        assert_eq!(rotation.on_trap(&code, 0), TrapOutcome::Foreign);
        assert_eq!(code.snapshot(), before);
    }

    #[test]
    fn test_disarm_restores_every_slot() {
        let code = FakeCode::new(&[NOP, NOP, RET]);
        let rotation = TrapRotation::capture(code.base, &code);
        rotation.arm(&code).unwrap();
        rotation.on_trap(&code, code.base + 1);

        rotation.disarm(&code).unwrap();
        assert_eq!(code.snapshot(), vec![NOP, NOP, RET]);
        assert_eq!(rotation.armed_count(&code), 0);
    }

    #[test]
    fn test_failed_restore_leaves_one_trap() {
        let code = FakeCode::new(&[NOP, NOP, RET]);
        let rotation = TrapRotation::capture(code.base, &code);
        rotation.arm(&code).unwrap();
        code.make_read_only(0);

        assert_eq!(rotation.on_trap(&code, code.base + 1), TrapOutcome::Foreign);
        assert_eq!(rotation.armed_count(&code), 1);
        assert_eq!(code.snapshot(), vec![TRAP_OPCODE, NOP, RET]);
    }

    #[test]
    fn test_failed_arm_of_next_slot_disarms() {
        let code = FakeCode::new(&[NOP, NOP, RET]);
        let rotation = TrapRotation::capture(code.base, &code);
        rotation.arm(&code).unwrap();
        code.make_read_only(1);

        let outcome = rotation.on_trap(&code, code.base + 1);
        assert!(outcome.is_arrival());
        assert_eq!(rotation.armed_count(&code), 0);
        assert_eq!(code.snapshot(), vec![NOP, NOP, RET]);
    }

    #[test]
    fn test_arm_fails_when_a_slot_is_not_writable() {
        let code = FakeCode::new(&[NOP, NOP, RET]).with_read_only(1);
        let rotation = TrapRotation::capture(code.base, &code);

        assert!(matches!(rotation.arm(&code), Err(Error::Protect { .. })));
        assert_eq!(code.snapshot(), vec![NOP, NOP, RET]);
    }
}
