use bitflags::bitflags;
use strum_macros::Display;

bitflags! {
    /// Conditions an I/O watch is interested in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const EXCEPT = 0x04;
        const IO = Self::READ.bits() | Self::WRITE.bits() | Self::EXCEPT.bits();
    }
}

impl Interest {
    pub fn as_u32(&self) -> u32 {
        self.bits()
    }
}

/// Why a watch's callback is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Reason {
    Read,
    Write,
    Except,
    Fire,
    Idle,
    Cancel,
}

impl Reason {
    /// Numeric code handed to scripts
    pub fn code(&self) -> i64 {
        match self {
            Reason::Read => 0x01,
            Reason::Write => 0x02,
            Reason::Except => 0x04,
            Reason::Fire => 0x08,
            Reason::Idle => 0x10,
            Reason::Cancel => 0x20,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0x01 => Some(Reason::Read),
            0x02 => Some(Reason::Write),
            0x04 => Some(Reason::Except),
            0x08 => Some(Reason::Fire),
            0x10 => Some(Reason::Idle),
            0x20 => Some(Reason::Cancel),
            _ => None,
        }
    }

    /// The interest bit an I/O reason satisfies
    pub fn interest(&self) -> Option<Interest> {
        match self {
            Reason::Read => Some(Interest::READ),
            Reason::Write => Some(Interest::WRITE),
            Reason::Except => Some(Interest::EXCEPT),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_mask_combines_all_conditions() {
        assert_eq!(Interest::IO.as_u32(), 7);
        assert!(Interest::IO.contains(Interest::READ | Interest::EXCEPT));
    }

    #[test]
    fn test_reason_codes() {
        for reason in [
            Reason::Read,
            Reason::Write,
            Reason::Except,
            Reason::Fire,
            Reason::Idle,
            Reason::Cancel,
        ] {
            assert_eq!(Reason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(Reason::from_code(3), None);
        assert_eq!(Reason::Fire.to_string(), "Fire");
    }
}
