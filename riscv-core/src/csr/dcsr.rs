//! Bitfield view over `dcsr` (debug control and status), the same idiom as [`super::status`].

use bitvec::field::BitField;
use bitvec::order::Lsb0;
use bitvec::view::BitView;

mod idx {
    pub const PRV_LO: usize = 0;
    pub const PRV_HI: usize = 2;
    pub const STEP: usize = 2;
    pub const NMIP: usize = 3;
    pub const CAUSE_LO: usize = 6;
    pub const CAUSE_HI: usize = 9;
    pub const EBREAKU: usize = 12;
    pub const EBREAKS: usize = 13;
    pub const EBREAKM: usize = 15;
}

/// Cause that most recently entered debug mode, encoded in `dcsr[8:6]` per `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCause {
    Ebreak,
    Trigger,
    Haltreq,
    Step,
    ResetHaltreq,
}

impl DebugCause {
    fn encode(self) -> u8 {
        match self {
            DebugCause::Ebreak => 1,
            DebugCause::Trigger => 2,
            DebugCause::Haltreq => 3,
            DebugCause::Step => 4,
            DebugCause::ResetHaltreq => 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Dcsr(u64);

impl Dcsr {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn step(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::STEP]
    }

    pub fn set_step(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::STEP, value);
    }

    pub fn nmip(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::NMIP]
    }

    pub fn set_nmip(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::NMIP, value);
    }

    pub fn set_cause(&mut self, cause: DebugCause) {
        self.0.view_bits_mut::<Lsb0>()[idx::CAUSE_LO..idx::CAUSE_HI].store(cause.encode());
    }

    pub fn set_prv(&mut self, prv: u8) {
        self.0.view_bits_mut::<Lsb0>()[idx::PRV_LO..idx::PRV_HI].store(prv & 0b11);
    }

    pub fn prv(self) -> u8 {
        self.0.view_bits::<Lsb0>()[idx::PRV_LO..idx::PRV_HI].load()
    }

    pub fn ebreakm(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::EBREAKM]
    }

    pub fn ebreaks(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::EBREAKS]
    }

    pub fn ebreaku(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::EBREAKU]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_and_cause_round_trip() {
        let mut dcsr = Dcsr::from_raw(0);
        dcsr.set_step(true);
        dcsr.set_cause(DebugCause::Trigger);
        assert!(dcsr.step());
        assert_eq!((dcsr.raw() >> 6) & 0b111, 2);
    }
}
