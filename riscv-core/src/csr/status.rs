//! Bitfield view over the raw `mstatus`/`sstatus` value, in the style of the teacher's
//! `red-planet-core/src/core/status.rs`. Unlike the teacher, this is not separately owned
//! storage: it is constructed from (and written back to) whatever raw `u64` `CsrFile` holds for
//! `MSTATUS`, since `spec.md`'s CSR file model is one generic mapping, not one struct per CSR.

use bitvec::field::BitField;
use bitvec::order::Lsb0;
use bitvec::view::BitView;

use crate::privilege::PrivilegeLevel;

mod idx {
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP_LO: usize = 11;
    pub const MPP_HI: usize = 13; // exclusive
}

/// A read/modify/write view over `mstatus`'s raw bits. Construct with [`Mstatus::from_raw`],
/// mutate, then store [`Mstatus::raw`] back through `CsrFile::write_raw`.
#[derive(Debug, Clone, Copy)]
pub struct Mstatus(u64);

impl Mstatus {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn mie(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MIE]
    }

    pub fn set_mie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    pub fn sie(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::SIE]
    }

    pub fn set_sie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    pub fn mpie(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MPIE]
    }

    pub fn set_mpie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    pub fn spie(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::SPIE]
    }

    pub fn set_spie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    pub fn spp(self) -> PrivilegeLevel {
        if self.0.view_bits::<Lsb0>()[idx::SPP] {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        }
    }

    pub fn set_spp(&mut self, level: PrivilegeLevel) {
        self.0.view_bits_mut::<Lsb0>().set(idx::SPP, level == PrivilegeLevel::Supervisor);
    }

    pub fn mpp(self) -> PrivilegeLevel {
        let bits: u8 = self.0.view_bits::<Lsb0>()[idx::MPP_LO..idx::MPP_HI].load();
        match bits {
            0b00 => PrivilegeLevel::User,
            0b01 => PrivilegeLevel::Supervisor,
            _ => PrivilegeLevel::Machine,
        }
    }

    pub fn set_mpp(&mut self, level: PrivilegeLevel) {
        let bits: u8 = match level {
            PrivilegeLevel::User => 0b00,
            PrivilegeLevel::Supervisor => 0b01,
            PrivilegeLevel::Machine => 0b11,
        };
        self.0.view_bits_mut::<Lsb0>()[idx::MPP_LO..idx::MPP_HI].store(bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mie_round_trip() {
        let mut status = Mstatus::from_raw(0);
        status.set_mie(true);
        assert!(status.mie());
        status.set_mie(false);
        assert!(!status.mie());
    }

    #[test]
    fn mpp_round_trip() {
        let mut status = Mstatus::from_raw(0);
        status.set_mpp(PrivilegeLevel::Supervisor);
        assert_eq!(status.mpp(), PrivilegeLevel::Supervisor);
        status.set_mpp(PrivilegeLevel::Machine);
        assert_eq!(status.mpp(), PrivilegeLevel::Machine);
    }
}
