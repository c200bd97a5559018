use std::{
    fmt,
    marker::PhantomData,
    sync::{atomic::Ordering, Arc},
};

use easy_bitfield::{AtomicBitfieldContainer, BitField, BitFieldTrait, FromBitfield, ToBitfield};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::{sync::monitor::Monitor, Runtime};

pub type ShapeBitfield = BitField<usize, LockShape, 0, 1, false>;
pub type HashStateBitfield = BitField<usize, HashState, { ShapeBitfield::NEXT_BIT }, 2, false>;
pub type ThinOwnerBitfield =
    BitField<usize, ThinLockId, { HashStateBitfield::NEXT_BIT }, 16, false>;
pub type ThinCountBitfield =
    BitField<usize, ThinLockCount, { ThinOwnerBitfield::NEXT_BIT }, 13, false>;

/// Bits of a fat lock word that hold the monitor address. Monitors are 8-byte aligned
/// so shape and hash state fit below the pointer.
pub const MONITOR_ADDRESS_MASK: usize = !((1usize << HashStateBitfield::NEXT_BIT) - 1);

/// Largest recursion depth a thin lock can encode. Entering once more inflates.
pub const THIN_LOCK_MAX_DEPTH: usize = ThinLockCount::MAX.0 as usize + 1;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum LockShape {
    Thin = 0,
    Fat = 1,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum HashState {
    Unhashed = 0,
    Hashed = 1,
    HashedAndMoved = 3,
}

/// Small numeric thread id stored in thin lock words. Zero is reserved and means
/// "no owner".
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct ThinLockId(u16);

impl ThinLockId {
    pub const NONE: Self = Self(0);

    pub const fn new(id: u16) -> Option<Self> {
        if id == 0 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ThinLockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw thin lock recursion field: depth minus one.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ThinLockCount(u16);

impl ThinLockCount {
    pub const MAX: Self = Self(0x1fff);
}

impl<S: FromPrimitive> ToBitfield<S> for LockShape {
    fn to_bitfield(self) -> S {
        S::from_u8(self as u8).unwrap()
    }

    fn one() -> Self {
        Self::Fat
    }

    fn zero() -> Self {
        Self::Thin
    }
}

impl<S: ToPrimitive> FromBitfield<S> for LockShape {
    fn from_bitfield(value: S) -> Self {
        match value.to_u8().unwrap() {
            0 => Self::Thin,
            _ => Self::Fat,
        }
    }

    fn from_i64(value: i64) -> Self {
        Self::from_bitfield(value)
    }
}

impl<S: FromPrimitive> ToBitfield<S> for HashState {
    fn one() -> Self {
        unreachable!()
    }

    fn zero() -> Self {
        Self::Unhashed
    }

    fn to_bitfield(self) -> S {
        S::from_u8(self as u8).unwrap()
    }
}

impl<S: ToPrimitive> FromBitfield<S> for HashState {
    fn from_bitfield(value: S) -> Self {
        let value = value.to_u8().unwrap();

        match value {
            0 => Self::Unhashed,
            1 => Self::Hashed,
            3 => Self::HashedAndMoved,
            _ => {
                cfg_if::cfg_if! {
                    if #[cfg(debug_assertions)] {
                        unreachable!("invalid hash state {value}")
                    } else {
                        unsafe { std::hint::unreachable_unchecked() }
                    }
                }
            }
        }
    }

    fn from_i64(_value: i64) -> Self {
        unreachable!()
    }
}

impl<S: FromPrimitive> ToBitfield<S> for ThinLockId {
    fn to_bitfield(self) -> S {
        S::from_u16(self.0).unwrap()
    }

    fn one() -> Self {
        Self(1)
    }

    fn zero() -> Self {
        Self::NONE
    }
}

impl<S: ToPrimitive> FromBitfield<S> for ThinLockId {
    fn from_bitfield(value: S) -> Self {
        Self(value.to_u16().unwrap())
    }

    fn from_i64(value: i64) -> Self {
        Self(value as u16)
    }
}

impl<S: FromPrimitive> ToBitfield<S> for ThinLockCount {
    fn to_bitfield(self) -> S {
        S::from_u16(self.0).unwrap()
    }

    fn one() -> Self {
        Self(1)
    }

    fn zero() -> Self {
        Self(0)
    }
}

impl<S: ToPrimitive> FromBitfield<S> for ThinLockCount {
    fn from_bitfield(value: S) -> Self {
        Self(value.to_u16().unwrap())
    }

    fn from_i64(value: i64) -> Self {
        Self(value as u16)
    }
}

/// Decoded lock state of an object.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LockState {
    Unlocked,
    Thin { owner: ThinLockId, depth: usize },
    Fat { monitor: usize },
}

/// The lock word stored in every object header.
///
/// ```text
/// thin: [ count:13 | owner:16 | hash:2 | 0 ]
/// fat:  [ monitor address (8-byte aligned) | hash:2 | 1 ]
/// ```
///
/// An all-zero word is an unhashed, unlocked thin word.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct LockWord(usize);

impl LockWord {
    pub const UNLOCKED: Self = Self(0);

    /// # Safety
    ///
    /// A fat `raw` must point to a live [`Monitor`]: fat words are trusted to reference
    /// the monitor owned by the header they came from.
    pub const unsafe fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    pub fn thin(owner: ThinLockId, depth: usize, hash: HashState) -> Self {
        debug_assert!(!owner.is_none(), "thin lock needs an owner");
        debug_assert!((1..=THIN_LOCK_MAX_DEPTH).contains(&depth));
        let word = HashStateBitfield::encode(hash);
        let word = ThinOwnerBitfield::update(owner, word);
        Self(ThinCountBitfield::update(ThinLockCount(depth as u16 - 1), word))
    }

    /// Only headers build fat words, from monitors they own.
    pub(crate) fn fat(monitor: usize, hash: HashState) -> Self {
        debug_assert!(monitor != 0, "fat lock word without monitor");
        debug_assert_eq!(monitor & !MONITOR_ADDRESS_MASK, 0, "misaligned monitor");
        let word = ShapeBitfield::update(LockShape::Fat, monitor);
        Self(HashStateBitfield::update(hash, word))
    }

    pub fn shape(self) -> LockShape {
        ShapeBitfield::decode(self.0)
    }

    pub fn hash_state(self) -> HashState {
        HashStateBitfield::decode(self.0)
    }

    /// Owner of a thin word; [`ThinLockId::NONE`] for unlocked or fat words.
    pub fn thin_owner(self) -> ThinLockId {
        match self.shape() {
            LockShape::Thin => ThinOwnerBitfield::decode(self.0),
            LockShape::Fat => ThinLockId::NONE,
        }
    }

    pub fn monitor_address(self) -> Option<usize> {
        match self.shape() {
            LockShape::Fat => Some(self.0 & MONITOR_ADDRESS_MASK),
            LockShape::Thin => None,
        }
    }

    pub fn with_hash_state(self, hash: HashState) -> Self {
        Self(HashStateBitfield::update(hash, self.0))
    }

    pub fn state(self) -> LockState {
        match self.shape() {
            LockShape::Fat => {
                let monitor = self.0 & MONITOR_ADDRESS_MASK;
                assert!(monitor != 0, "fat lock word {:#x} without a monitor", self.0);
                LockState::Fat { monitor }
            }
            LockShape::Thin => {
                let owner: ThinLockId = ThinOwnerBitfield::decode(self.0);
                if owner.is_none() {
                    LockState::Unlocked
                } else {
                    let count: ThinLockCount = ThinCountBitfield::decode(self.0);
                    LockState::Thin {
                        owner,
                        depth: count.0 as usize + 1,
                    }
                }
            }
        }
    }
}

impl fmt::Debug for LockWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockWord")
            .field("raw", &format_args!("{:#x}", self.0))
            .field("hash", &self.hash_state())
            .field("state", &self.state())
            .finish()
    }
}

/// Lock word storage embedded in every object by the object model.
///
/// When the word is fat the header owns the [`Monitor`] it points to and releases it
/// when the object is destroyed.
pub struct HeapObjectHeader<R: Runtime> {
    lock: AtomicBitfieldContainer<usize>,

    marker: PhantomData<R>,
}

impl<R: Runtime> HeapObjectHeader<R> {
    pub fn new() -> Self {
        Self {
            lock: AtomicBitfieldContainer::new(0),
            marker: PhantomData,
        }
    }

    pub fn lock_word(&self) -> LockWord {
        LockWord(self.lock.load(Ordering::Acquire))
    }

    pub fn hash_state(&self) -> HashState {
        self.lock.read::<HashStateBitfield>()
    }

    /// May fail spuriously; callers re-read the word and retry.
    pub(crate) fn compare_exchange_lock_word(
        &self,
        current: LockWord,
        new: LockWord,
    ) -> Result<LockWord, LockWord> {
        self.lock
            .compare_exchange_weak(current.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .map(LockWord)
            .map_err(LockWord)
    }

    /// Publish `monitor` as this object's fat lock if the word still equals `current`.
    ///
    /// On failure the monitor is handed back untouched so the caller can discard it.
    pub(crate) fn install_monitor(
        &self,
        current: LockWord,
        monitor: Arc<Monitor<R>>,
    ) -> Result<(), Arc<Monitor<R>>> {
        let raw = Arc::into_raw(monitor);
        let fat = LockWord::fat(raw as usize, current.hash_state());

        match self.compare_exchange_lock_word(current, fat) {
            Ok(_) => Ok(()),
            Err(_) => Err(unsafe { Arc::from_raw(raw) }),
        }
    }

    /// Monitor referenced by `word`, which must have been loaded from this header.
    ///
    /// Fat words are never rewritten back to thin ones, so the monitor lives as long
    /// as the header does.
    pub(crate) fn monitor(&self, word: LockWord) -> Option<&Monitor<R>> {
        word.monitor_address()
            .map(|address| unsafe { &*(address as *const Monitor<R>) })
    }
}

impl<R: Runtime> Default for HeapObjectHeader<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime> Drop for HeapObjectHeader<R> {
    fn drop(&mut self) {
        if let Some(address) = self.lock_word().monitor_address() {
            unsafe {
                drop(Arc::from_raw(address as *const Monitor<R>));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u16) -> ThinLockId {
        ThinLockId::new(n).unwrap()
    }

    #[test]
    fn fresh_word_is_unlocked_and_unhashed() {
        let word = LockWord::UNLOCKED;
        assert_eq!(word.raw(), 0);
        assert_eq!(word.shape(), LockShape::Thin);
        assert_eq!(word.hash_state(), HashState::Unhashed);
        assert_eq!(word.state(), LockState::Unlocked);
        assert_eq!(word.thin_owner(), ThinLockId::NONE);
    }

    #[test]
    fn thin_word_keeps_fields_apart() {
        let word = LockWord::thin(id(u16::MAX), THIN_LOCK_MAX_DEPTH, HashState::HashedAndMoved);
        assert_eq!(word.shape(), LockShape::Thin);
        assert_eq!(word.hash_state(), HashState::HashedAndMoved);
        assert_eq!(
            word.state(),
            LockState::Thin {
                owner: id(u16::MAX),
                depth: THIN_LOCK_MAX_DEPTH
            }
        );

        let word = LockWord::thin(id(7), 1, HashState::Unhashed);
        assert_eq!(word.thin_owner(), id(7));
        assert_eq!(word.raw(), 7 << 3);
    }

    #[test]
    fn thin_depth_limit_matches_count_width() {
        assert_eq!(THIN_LOCK_MAX_DEPTH, 8192);
        assert_eq!(ThinCountBitfield::NEXT_BIT, 32);
    }

    #[test]
    fn fat_word_masks_monitor_address() {
        let address = 0x7f00_dead_bee0usize;
        let word = LockWord::fat(address, HashState::Hashed);
        assert_eq!(word.shape(), LockShape::Fat);
        assert_eq!(word.hash_state(), HashState::Hashed);
        assert_eq!(word.monitor_address(), Some(address));
        assert_eq!(word.state(), LockState::Fat { monitor: address });
        assert_eq!(word.thin_owner(), ThinLockId::NONE);
    }

    #[test]
    fn hash_state_update_preserves_lock_bits() {
        let word = LockWord::thin(id(42), 3, HashState::Unhashed);
        let hashed = word.with_hash_state(HashState::Hashed);
        assert_eq!(hashed.state(), word.state());
        assert_eq!(hashed.hash_state(), HashState::Hashed);

        let fat = LockWord::fat(0x1000, HashState::Hashed).with_hash_state(HashState::HashedAndMoved);
        assert_eq!(fat.monitor_address(), Some(0x1000));
        assert_eq!(fat.hash_state(), HashState::HashedAndMoved);
    }

    #[test]
    fn lock_word_exchange_only_replaces_the_expected_word() {
        let header = HeapObjectHeader::<crate::mock::MockVM>::new();
        let locked = LockWord::thin(id(3), 1, HashState::Unhashed);

        let stale = LockWord::thin(id(4), 1, HashState::Unhashed);
        for _ in 0..100 {
            assert_eq!(header.compare_exchange_lock_word(stale, locked), Err(LockWord::UNLOCKED));
        }

        while header
            .compare_exchange_lock_word(LockWord::UNLOCKED, locked)
            .is_err()
        {
            assert_eq!(header.lock_word(), LockWord::UNLOCKED);
        }
        assert_eq!(header.lock_word(), locked);
    }

    #[test]
    fn thin_lock_id_zero_is_reserved() {
        assert!(ThinLockId::new(0).is_none());
        assert!(ThinLockId::NONE.is_none());
        assert_eq!(id(5).as_u16(), 5);
        assert_eq!(id(5).to_string(), "5");
    }
}
