use bitflags::bitflags;

bitflags! {
    /// Runtime behaviour switches for a [`HashTable`](crate::HashTable).
    ///
    /// Key and value ownership are chosen through type parameters instead; the
    /// flags here only cover behaviour that may reasonably change over the life
    /// of a table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TableFlags: u8 {
        /// Do not create a mutex when the table is turned into a
        /// [`SharedTable`](crate::shared::SharedTable).
        const NO_LOCKING = 1 << 1;

        /// Never grow automatically. Insertions still succeed while a free
        /// slot remains.
        const FROZEN = 1 << 2;

        /// Like `FROZEN`, but cleared by the next explicit growth
        /// ([`reserve`](crate::HashTable::reserve)).
        const FROZEN_UNTIL_GROWS = 1 << 3;

        /// Compare and hash keys without regard to ASCII case.
        const IGNORE_CASE = 1 << 5;
    }
}

impl TableFlags {
    pub(crate) fn growth_suppressed(self) -> bool {
        self.intersects(Self::FROZEN | Self::FROZEN_UNTIL_GROWS)
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;

    use super::*;

    #[test]
    fn set_operations() {
        let flags = TableFlags::FROZEN | TableFlags::IGNORE_CASE;
        assert!(flags.contains(TableFlags::FROZEN));
        assert!(!flags.contains(TableFlags::FROZEN | TableFlags::NO_LOCKING));
        assert!(flags.intersects(TableFlags::FROZEN | TableFlags::NO_LOCKING));
        assert_eq!(flags & !TableFlags::FROZEN, TableFlags::IGNORE_CASE);
        assert!(flags.growth_suppressed());
        assert!(!TableFlags::IGNORE_CASE.growth_suppressed());
        assert!(TableFlags::FROZEN_UNTIL_GROWS.growth_suppressed());
    }

    #[test]
    fn truncates_unknown_bits() {
        assert_eq!(TableFlags::from_bits_truncate(0xFF).bits(), 0b0010_1110);
        assert!(TableFlags::from_bits_truncate(0b1).is_empty());
        assert_eq!(TableFlags::from_bits(0b1), None);
    }

    #[test]
    fn debug_lists_names() {
        assert_eq!(
            format!("{:?}", TableFlags::NO_LOCKING | TableFlags::IGNORE_CASE),
            "TableFlags(NO_LOCKING | IGNORE_CASE)"
        );
    }
}
