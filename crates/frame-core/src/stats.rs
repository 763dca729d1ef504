//! Lifetime operating statistics and their flash persistence.

use embedded_storage::nor_flash::NorFlash;
use log::{debug, warn};

use crate::error::{CycleError, Result};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleStats {
    pub success_count: u32,
    pub fail_count: u32,
    pub awake_time_ms: u32,
    pub connecting_time_ms: u32,
    pub display_on_time_ms: u32,
}

impl CycleStats {
    /// Add `delta` field by field. Totals saturate instead of wrapping.
    pub fn accumulate(&mut self, delta: &CycleStats) {
        self.success_count = self.success_count.saturating_add(delta.success_count);
        self.fail_count = self.fail_count.saturating_add(delta.fail_count);
        self.awake_time_ms = self.awake_time_ms.saturating_add(delta.awake_time_ms);
        self.connecting_time_ms = self
            .connecting_time_ms
            .saturating_add(delta.connecting_time_ms);
        self.display_on_time_ms = self
            .display_on_time_ms
            .saturating_add(delta.display_on_time_ms);
    }

    pub fn cycles(&self) -> u64 {
        u64::from(self.success_count) + u64::from(self.fail_count)
    }

    fn named(&self) -> [(&'static str, u32); 5] {
        [
            (KEY_SUCCESS, self.success_count),
            (KEY_FAIL, self.fail_count),
            (KEY_AWAKE, self.awake_time_ms),
            (KEY_CONNECTING, self.connecting_time_ms),
            (KEY_DISPLAY, self.display_on_time_ms),
        ]
    }

    fn set_named(&mut self, name: &[u8], value: u32) {
        let field = match name {
            b"success" => &mut self.success_count,
            b"fail" => &mut self.fail_count,
            b"awake" => &mut self.awake_time_ms,
            b"connecting" => &mut self.connecting_time_ms,
            b"display" => &mut self.display_on_time_ms,
            _ => return,
        };
        *field = value;
    }
}

/// Durable home of [`CycleStats`].
pub trait StatsStore {
    /// Current totals; counters never written read as zero.
    fn load(&mut self) -> Result<CycleStats>;

    /// Replace the stored totals in one commit.
    fn store(&mut self, totals: &CycleStats) -> Result<()>;

    /// Read, add `delta`, write back. Returns the new totals.
    fn merge(&mut self, delta: &CycleStats) -> Result<CycleStats> {
        let mut totals = self.load()?;
        totals.accumulate(delta);
        self.store(&totals)?;
        Ok(totals)
    }
}

pub const STATS_NAMESPACE: &str = "app_stats";

const KEY_SUCCESS: &str = "success";
const KEY_FAIL: &str = "fail";
const KEY_AWAKE: &str = "awake";
const KEY_CONNECTING: &str = "connecting";
const KEY_DISPLAY: &str = "display";

const RECORD_MAGIC: u32 = 0x5453_5453; // "STST"
const RECORD_VERSION: u8 = 1;
const RECORD_CAPACITY: usize = 256;
const SLOT_COUNT: u32 = 2;

/// Stats kept in two flash sectors used alternately.
///
/// Each sector holds one checksummed record. A write always targets the
/// sector not holding the newest valid record, so a torn write never
/// destroys the previous totals.
pub struct FlashStatsStore<F> {
    flash: F,
    base: u32,
}

impl<F: NorFlash> FlashStatsStore<F> {
    /// `base` is the offset of the first of two erase sectors reserved for stats.
    pub fn new(flash: F, base: u32) -> Result<Self> {
        let sector = F::ERASE_SIZE as u32;
        if base % sector != 0 {
            return Err(CycleError::StorageError("stats region not sector aligned"));
        }
        let end = base as usize + (SLOT_COUNT * sector) as usize;
        if end > flash.capacity() {
            return Err(CycleError::StorageError("stats region outside flash"));
        }
        if RECORD_CAPACITY % F::WRITE_SIZE != 0 || RECORD_CAPACITY > F::ERASE_SIZE {
            return Err(CycleError::StorageError("unsupported flash geometry"));
        }
        Ok(Self { flash, base })
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn slot_offset(&self, slot: u32) -> u32 {
        self.base + slot * F::ERASE_SIZE as u32
    }

    fn read_slot(&mut self, slot: u32) -> Result<Option<(u32, CycleStats)>> {
        let mut buf = [0u8; RECORD_CAPACITY];
        self.flash
            .read(self.slot_offset(slot), &mut buf)
            .map_err(|_| CycleError::StorageError("flash read failed"))?;
        let record = decode_record(&buf);
        if record.is_none() && buf.iter().any(|b| *b != 0xFF) {
            warn!("stats slot {slot} holds no valid record");
        }
        Ok(record)
    }

    /// Newest valid record as `(slot, sequence, totals)`.
    fn newest(&mut self) -> Result<Option<(u32, u32, CycleStats)>> {
        let mut newest: Option<(u32, u32, CycleStats)> = None;
        for slot in 0..SLOT_COUNT {
            let Some((seq, totals)) = self.read_slot(slot)? else {
                continue;
            };
            let is_newer = match newest {
                None => true,
                Some((_, best, _)) => (seq.wrapping_sub(best) as i32) > 0,
            };
            if is_newer {
                newest = Some((slot, seq, totals));
            }
        }
        Ok(newest)
    }
}

impl<F: NorFlash> StatsStore for FlashStatsStore<F> {
    fn load(&mut self) -> Result<CycleStats> {
        Ok(self
            .newest()?
            .map(|(_, _, totals)| totals)
            .unwrap_or_default())
    }

    fn store(&mut self, totals: &CycleStats) -> Result<()> {
        let (slot, seq) = match self.newest()? {
            Some((slot, seq, _)) => ((slot + 1) % SLOT_COUNT, seq.wrapping_add(1)),
            None => (0, 1),
        };

        let mut buf = [0xFFu8; RECORD_CAPACITY];
        let used = encode_record(seq, totals, &mut buf);
        let len = used.div_ceil(F::WRITE_SIZE) * F::WRITE_SIZE;

        let offset = self.slot_offset(slot);
        self.flash
            .erase(offset, offset + F::ERASE_SIZE as u32)
            .map_err(|_| CycleError::StorageError("flash erase failed"))?;
        self.flash
            .write(offset, &buf[..len])
            .map_err(|_| CycleError::StorageError("flash write failed"))?;
        debug!("stats record {seq} written to slot {slot}");
        Ok(())
    }
}

/// Layout: magic u32 | version u8 | namespace len u8 | namespace |
/// sequence u32 | entry count u8 | (name len u8 | name | value u32)* | checksum u32.
/// Integers are little-endian.
fn encode_record(seq: u32, totals: &CycleStats, buf: &mut [u8; RECORD_CAPACITY]) -> usize {
    let mut at = 0;
    let mut put = |bytes: &[u8]| {
        buf[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };

    put(&RECORD_MAGIC.to_le_bytes());
    put(&[RECORD_VERSION, STATS_NAMESPACE.len() as u8]);
    put(STATS_NAMESPACE.as_bytes());
    put(&seq.to_le_bytes());
    let entries = totals.named();
    put(&[entries.len() as u8]);
    for (name, value) in entries {
        put(&[name.len() as u8]);
        put(name.as_bytes());
        put(&value.to_le_bytes());
    }

    let checksum = checksum32(&buf[..at]);
    buf[at..at + 4].copy_from_slice(&checksum.to_le_bytes());
    at + 4
}

fn decode_record(buf: &[u8]) -> Option<(u32, CycleStats)> {
    let mut reader = Reader { buf, at: 0 };
    if reader.u32()? != RECORD_MAGIC || reader.u8()? != RECORD_VERSION {
        return None;
    }
    let ns_len = reader.u8()? as usize;
    if reader.take(ns_len)? != STATS_NAMESPACE.as_bytes() {
        return None;
    }
    let seq = reader.u32()?;
    let count = reader.u8()?;

    let mut totals = CycleStats::default();
    for _ in 0..count {
        let name_len = reader.u8()? as usize;
        let name = reader.take(name_len)?;
        let value = reader.u32()?;
        totals.set_named(name, value);
    }

    let body_len = reader.at;
    let expected = reader.u32()?;
    (checksum32(&buf[..body_len]) == expected).then_some((seq, totals))
}

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.at..self.at.checked_add(len)?)?;
        self.at += len;
        Some(bytes)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
pub(crate) mod tests {
    use embedded_storage::nor_flash::{
        ErrorType, NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };

    use super::*;

    const SECTOR: usize = 4096;

    #[derive(Debug)]
    pub(crate) struct RamFlashError;

    impl NorFlashError for RamFlashError {
        fn kind(&self) -> NorFlashErrorKind {
            NorFlashErrorKind::Other
        }
    }

    /// NOR semantics: erase sets bytes to 0xFF, writes can only clear bits.
    pub(crate) struct RamFlash {
        pub(crate) data: Vec<u8>,
        /// Bytes the next write commits before failing.
        pub(crate) tear_next_write_at: Option<usize>,
        pub(crate) fail_reads: bool,
    }

    impl RamFlash {
        pub(crate) fn new(sectors: usize) -> Self {
            Self {
                data: vec![0xFF; sectors * SECTOR],
                tear_next_write_at: None,
                fail_reads: false,
            }
        }
    }

    impl ErrorType for RamFlash {
        type Error = RamFlashError;
    }

    impl ReadNorFlash for RamFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            if self.fail_reads {
                return Err(RamFlashError);
            }
            let start = offset as usize;
            bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.data.len()
        }
    }

    impl NorFlash for RamFlash {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = SECTOR;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            assert_eq!(from as usize % SECTOR, 0);
            assert_eq!(to as usize % SECTOR, 0);
            self.data[from as usize..to as usize].fill(0xFF);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            assert_eq!(offset as usize % Self::WRITE_SIZE, 0);
            assert_eq!(bytes.len() % Self::WRITE_SIZE, 0);
            let keep = self.tear_next_write_at.take().unwrap_or(bytes.len());
            let start = offset as usize;
            for (dst, src) in self.data[start..].iter_mut().zip(&bytes[..keep]) {
                *dst &= *src;
            }
            if keep < bytes.len() {
                return Err(RamFlashError);
            }
            Ok(())
        }
    }

    fn delta(success: bool, awake: u32, connecting: u32, display: u32) -> CycleStats {
        CycleStats {
            success_count: success as u32,
            fail_count: (!success) as u32,
            awake_time_ms: awake,
            connecting_time_ms: connecting,
            display_on_time_ms: display,
        }
    }

    #[test]
    fn first_boot_reads_all_zero() {
        let mut store = FlashStatsStore::new(RamFlash::new(4), 2 * SECTOR as u32).unwrap();
        assert_eq!(store.load().unwrap(), CycleStats::default());
    }

    #[test]
    fn merge_accumulates_across_cycles() {
        let mut store = FlashStatsStore::new(RamFlash::new(2), 0).unwrap();
        store.merge(&delta(true, 4_000, 2_000, 1_500)).unwrap();
        store.merge(&delta(false, 11_000, 10_000, 0)).unwrap();
        let totals = store.merge(&delta(true, 5_000, 1_000, 1_200)).unwrap();

        assert_eq!(
            totals,
            CycleStats {
                success_count: 2,
                fail_count: 1,
                awake_time_ms: 20_000,
                connecting_time_ms: 13_000,
                display_on_time_ms: 2_700,
            }
        );
        assert_eq!(store.load().unwrap(), totals);
        assert_eq!(totals.cycles(), 3);
    }

    #[test]
    fn merging_twice_equals_merging_the_sum() {
        let d1 = delta(true, 3_000, 900, 400);
        let d2 = delta(false, 10_500, 10_000, 0);

        let mut stepwise = FlashStatsStore::new(RamFlash::new(2), 0).unwrap();
        stepwise.merge(&d1).unwrap();
        stepwise.merge(&d2).unwrap();

        let mut reversed = FlashStatsStore::new(RamFlash::new(2), 0).unwrap();
        reversed.merge(&d2).unwrap();
        reversed.merge(&d1).unwrap();

        let mut sum = d1;
        sum.accumulate(&d2);
        let mut once = FlashStatsStore::new(RamFlash::new(2), 0).unwrap();
        once.merge(&sum).unwrap();

        assert_eq!(stepwise.load().unwrap(), once.load().unwrap());
        assert_eq!(reversed.load().unwrap(), once.load().unwrap());
    }

    #[test]
    fn totals_survive_reopening() {
        let mut store = FlashStatsStore::new(RamFlash::new(2), 0).unwrap();
        for _ in 0..5 {
            store.merge(&delta(true, 100, 10, 1)).unwrap();
        }
        let mut reopened = FlashStatsStore::new(store.into_inner(), 0).unwrap();
        assert_eq!(reopened.load().unwrap().success_count, 5);
    }

    #[test]
    fn torn_write_keeps_previous_totals() {
        let mut store = FlashStatsStore::new(RamFlash::new(2), 0).unwrap();
        store.merge(&delta(true, 1_000, 500, 200)).unwrap();
        store.merge(&delta(true, 1_000, 500, 200)).unwrap();
        let committed = store.load().unwrap();

        let mut flash = store.into_inner();
        flash.tear_next_write_at = Some(12);
        let mut store = FlashStatsStore::new(flash, 0).unwrap();
        assert!(matches!(
            store.merge(&delta(false, 9_000, 9_000, 0)),
            Err(CycleError::StorageError(_))
        ));
        assert_eq!(store.load().unwrap(), committed);

        let totals = store.merge(&delta(false, 9_000, 9_000, 0)).unwrap();
        assert_eq!(totals.fail_count, 1);
        assert_eq!(totals.success_count, 2);
    }

    #[test]
    fn corrupt_record_is_ignored() {
        let mut store = FlashStatsStore::new(RamFlash::new(2), 0).unwrap();
        store.merge(&delta(true, 1, 1, 1)).unwrap();
        let mut flash = store.into_inner();
        flash.data[20] ^= 0x01;
        let mut store = FlashStatsStore::new(flash, 0).unwrap();
        assert_eq!(store.load().unwrap(), CycleStats::default());
    }

    #[test]
    fn record_without_some_counters_reads_them_as_zero() {
        let mut buf = [0xFFu8; RECORD_CAPACITY];
        let mut at = 0;
        let mut put = |bytes: &[u8]| {
            buf[at..at + bytes.len()].copy_from_slice(bytes);
            at += bytes.len();
        };
        put(&RECORD_MAGIC.to_le_bytes());
        put(&[RECORD_VERSION, STATS_NAMESPACE.len() as u8]);
        put(STATS_NAMESPACE.as_bytes());
        put(&7u32.to_le_bytes());
        put(&[2]);
        put(&[7]);
        put(b"success");
        put(&4u32.to_le_bytes());
        put(&[9]);
        put(b"unrelated");
        put(&99u32.to_le_bytes());
        let checksum = checksum32(&buf[..at]);
        buf[at..at + 4].copy_from_slice(&checksum.to_le_bytes());

        let (seq, totals) = decode_record(&buf).unwrap();
        assert_eq!(seq, 7);
        assert_eq!(
            totals,
            CycleStats {
                success_count: 4,
                ..Default::default()
            }
        );
    }

    #[test]
    fn counters_saturate() {
        let mut totals = CycleStats {
            awake_time_ms: u32::MAX - 5,
            ..Default::default()
        };
        totals.accumulate(&delta(true, 100, 0, 0));
        assert_eq!(totals.awake_time_ms, u32::MAX);
        assert_eq!(totals.success_count, 1);
    }

    #[test]
    fn misaligned_region_is_rejected() {
        assert!(FlashStatsStore::new(RamFlash::new(2), 100).is_err());
        assert!(FlashStatsStore::new(RamFlash::new(2), SECTOR as u32).is_err());
    }

    #[test]
    fn read_failure_is_a_storage_error() {
        let mut flash = RamFlash::new(2);
        flash.fail_reads = true;
        let mut store = FlashStatsStore::new(flash, 0).unwrap();
        assert!(matches!(store.load(), Err(CycleError::StorageError(_))));
    }
}
