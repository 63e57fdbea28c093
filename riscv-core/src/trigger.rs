//! Debug triggers: `tselect`/`tdata1-3`, chained pairs, `icount` countdown, `spec.md` §4.6.
//!
//! The teacher has no debug-trigger machinery at all, so this is built in the style of `csr/`
//! (small bitfield-view struct over a raw `u64`, mask-apply writes) for consistency with the rest
//! of the architectural state, rather than lifted from any one teacher file.

use bitvec::field::BitField;
use bitvec::order::Lsb0;
use bitvec::view::BitView;

use crate::privilege::PrivilegeLevel;

/// What a trigger compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    AddrBefore,
    AddrAfter,
    Opcode,
    LoadAddr,
    StoreAddr,
    LoadData,
    StoreData,
    Icount,
    Disabled,
}

impl MatchMode {
    fn encode(self) -> u8 {
        match self {
            MatchMode::Disabled => 0,
            MatchMode::AddrBefore => 1,
            MatchMode::AddrAfter => 2,
            MatchMode::Opcode => 3,
            MatchMode::LoadAddr => 4,
            MatchMode::StoreAddr => 5,
            MatchMode::LoadData => 6,
            MatchMode::StoreData => 7,
            MatchMode::Icount => 8,
        }
    }

    fn decode(bits: u8) -> Self {
        match bits {
            1 => MatchMode::AddrBefore,
            2 => MatchMode::AddrAfter,
            3 => MatchMode::Opcode,
            4 => MatchMode::LoadAddr,
            5 => MatchMode::StoreAddr,
            6 => MatchMode::LoadData,
            7 => MatchMode::StoreData,
            8 => MatchMode::Icount,
            _ => MatchMode::Disabled,
        }
    }
}

/// What happens when a trigger (or chained pair) fires, `spec.md` §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Breakpoint,
    EnterDebugMode,
}

mod idx {
    pub const MODE_LO: usize = 0;
    pub const MODE_HI: usize = 4;
    pub const ACTION: usize = 4;
    pub const CHAIN: usize = 5;
    pub const DMODE: usize = 6;
    pub const M: usize = 7;
    pub const S: usize = 8;
    pub const U: usize = 9;
    pub const COUNT_LO: usize = 16;
    pub const COUNT_HI: usize = 32;
}

/// Bitfield view of one trigger's `tdata1`. `tdata2` is the raw compare value (address, opcode,
/// or load/store data depending on [`MatchMode`]); `tdata3` is reserved (kept for the CSR-number
/// surface but unused by any currently-supported match mode).
#[derive(Debug, Clone, Copy, Default)]
pub struct Tdata1(u64);

impl Tdata1 {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn mode(self) -> MatchMode {
        let bits: u8 = self.0.view_bits::<Lsb0>()[idx::MODE_LO..idx::MODE_HI].load();
        MatchMode::decode(bits)
    }

    pub fn set_mode(&mut self, mode: MatchMode) {
        self.0.view_bits_mut::<Lsb0>()[idx::MODE_LO..idx::MODE_HI].store(mode.encode());
    }

    pub fn action(self) -> TriggerAction {
        if self.0.view_bits::<Lsb0>()[idx::ACTION] {
            TriggerAction::EnterDebugMode
        } else {
            TriggerAction::Breakpoint
        }
    }

    pub fn set_action(&mut self, action: TriggerAction) {
        self.0.view_bits_mut::<Lsb0>().set(idx::ACTION, action == TriggerAction::EnterDebugMode);
    }

    pub fn chain(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::CHAIN]
    }

    pub fn set_chain(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::CHAIN, value);
    }

    /// Debug-mode-only trigger: only visible/writable while the hart is in debug mode.
    pub fn dmode(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::DMODE]
    }

    pub fn set_dmode(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::DMODE, value);
    }

    pub fn enabled_in(self, level: PrivilegeLevel) -> bool {
        let bits = self.0.view_bits::<Lsb0>();
        match level {
            PrivilegeLevel::Machine => bits[idx::M],
            PrivilegeLevel::Supervisor => bits[idx::S],
            PrivilegeLevel::User => bits[idx::U],
        }
    }

    pub fn set_enabled_in(&mut self, level: PrivilegeLevel, value: bool) {
        let bit = match level {
            PrivilegeLevel::Machine => idx::M,
            PrivilegeLevel::Supervisor => idx::S,
            PrivilegeLevel::User => idx::U,
        };
        self.0.view_bits_mut::<Lsb0>().set(bit, value);
    }

    /// `icount`'s remaining count-down, `spec.md` §4: "original decrements a live counter per
    /// retired instruction and fires at zero rather than comparing absolute counts".
    pub fn count(self) -> u16 {
        self.0.view_bits::<Lsb0>()[idx::COUNT_LO..idx::COUNT_HI].load()
    }

    pub fn set_count(&mut self, count: u16) {
        self.0.view_bits_mut::<Lsb0>()[idx::COUNT_LO..idx::COUNT_HI].store(count);
    }
}

/// One trigger cell: `{tdata1, tdata2, tdata3}` per `spec.md` §3.
#[derive(Debug, Clone, Copy, Default)]
pub struct Trigger {
    pub tdata1: Tdata1,
    pub tdata2: u64,
    pub tdata3: u64,
}

/// Up to `K` trigger cells plus `tselect`, `spec.md` §3/§4.6.
#[derive(Debug, Clone)]
pub struct TriggerUnit {
    triggers: Vec<Trigger>,
    tselect: usize,
}

impl TriggerUnit {
    pub fn new(count: usize) -> Self {
        Self { triggers: vec![Trigger::default(); count], tselect: 0 }
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn tselect(&self) -> usize {
        self.tselect
    }

    pub fn set_tselect(&mut self, value: usize) {
        if value < self.triggers.len() {
            self.tselect = value;
        }
    }

    pub fn selected(&self) -> &Trigger {
        &self.triggers[self.tselect]
    }

    pub fn selected_mut(&mut self) -> &mut Trigger {
        &mut self.triggers[self.tselect]
    }

    pub fn get(&self, ix: usize) -> Option<&Trigger> {
        self.triggers.get(ix)
    }

    /// Scans every trigger (and its chained partner, if any) for a hit against `mode`/`value` at
    /// the current privilege level. `spec.md` §4.6: "Triggers may be paired... both must fire for
    /// action." Returns the first tripped trigger's action, if any, as `(index, action)`.
    pub fn evaluate(&self, mode: MatchMode, value: u64, level: PrivilegeLevel) -> Option<(usize, TriggerAction)> {
        let single_hit = |ix: usize| -> bool {
            let t = &self.triggers[ix];
            t.tdata1.mode() == mode && t.tdata1.enabled_in(level) && t.tdata2 == value
        };
        let mut ix = 0;
        while ix < self.triggers.len() {
            let t = &self.triggers[ix];
            if t.tdata1.mode() != mode {
                ix += 1;
                continue;
            }
            if t.tdata1.chain() && ix + 1 < self.triggers.len() {
                if single_hit(ix) && single_hit(ix + 1) {
                    return Some((ix + 1, self.triggers[ix + 1].tdata1.action()));
                }
                ix += 2;
            } else {
                if single_hit(ix) {
                    return Some((ix, t.tdata1.action()));
                }
                ix += 1;
            }
        }
        None
    }

    /// Ticks every armed `icount` trigger down by one (called once per retired instruction);
    /// returns the actions of any trigger whose count just reached zero, after which the trigger
    /// auto-disarms (reloading from `tdata2`'s saved initial count would require harness
    /// re-arming, matching real `icount` semantics of firing once per arm).
    pub fn tick_icount(&mut self) -> Vec<(usize, TriggerAction)> {
        let mut fired = Vec::new();
        for (ix, t) in self.triggers.iter_mut().enumerate() {
            if t.tdata1.mode() != MatchMode::Icount {
                continue;
            }
            let count = t.tdata1.count();
            if count == 0 {
                continue;
            }
            let remaining = count - 1;
            t.tdata1.set_count(remaining);
            if remaining == 0 {
                fired.push((ix, t.tdata1.action()));
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_trigger_fires_on_exact_address() {
        let mut unit = TriggerUnit::new(4);
        unit.selected_mut().tdata1.set_mode(MatchMode::AddrBefore);
        unit.selected_mut().tdata1.set_enabled_in(PrivilegeLevel::Machine, true);
        unit.selected_mut().tdata2 = 0x8000_0000;
        let hit = unit.evaluate(MatchMode::AddrBefore, 0x8000_0000, PrivilegeLevel::Machine);
        assert_eq!(hit, Some((0, TriggerAction::Breakpoint)));
    }

    #[test]
    fn trigger_disabled_in_current_privilege_does_not_fire() {
        let mut unit = TriggerUnit::new(4);
        unit.selected_mut().tdata1.set_mode(MatchMode::AddrBefore);
        unit.selected_mut().tdata2 = 0x8000_0000;
        let hit = unit.evaluate(MatchMode::AddrBefore, 0x8000_0000, PrivilegeLevel::Machine);
        assert_eq!(hit, None);
    }

    #[test]
    fn chained_pair_requires_both_to_match() {
        let mut unit = TriggerUnit::new(4);
        unit.set_tselect(0);
        unit.selected_mut().tdata1.set_mode(MatchMode::StoreAddr);
        unit.selected_mut().tdata1.set_chain(true);
        unit.selected_mut().tdata1.set_enabled_in(PrivilegeLevel::Machine, true);
        unit.selected_mut().tdata2 = 0x1000;
        unit.set_tselect(1);
        unit.selected_mut().tdata1.set_mode(MatchMode::StoreAddr);
        unit.selected_mut().tdata1.set_enabled_in(PrivilegeLevel::Machine, true);
        unit.selected_mut().tdata2 = 0x1000;
        unit.selected_mut().tdata1.set_action(TriggerAction::EnterDebugMode);

        assert_eq!(
            unit.evaluate(MatchMode::StoreAddr, 0x1000, PrivilegeLevel::Machine),
            Some((1, TriggerAction::EnterDebugMode))
        );
    }

    #[test]
    fn icount_fires_once_count_reaches_zero() {
        let mut unit = TriggerUnit::new(2);
        unit.selected_mut().tdata1.set_mode(MatchMode::Icount);
        unit.selected_mut().tdata1.set_count(2);
        assert!(unit.tick_icount().is_empty());
        assert_eq!(unit.tick_icount(), vec![(0, TriggerAction::Breakpoint)]);
    }
}
