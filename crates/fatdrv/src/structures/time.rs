/// A packed FAT timestamp: a 16-bit time word (2-second granularity) and a
/// 16-bit date word (epoch 1980).
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FatTime {
    pub time: u16,
    pub date: u16,
}

impl FatTime {
    pub fn new(time: u16, date: u16) -> Self {
        Self { time, date }
    }

    /// Packs calendar fields. Seconds are halved; out-of-range fields are
    /// masked to their bit width.
    pub fn from_parts(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        let date = ((year.saturating_sub(1980) & 0x7F) << 9)
            | ((month as u16 & 0x0F) << 5)
            | (day as u16 & 0x1F);
        let time = ((hour as u16 & 0x1F) << 11)
            | ((minute as u16 & 0x3F) << 5)
            | ((second as u16 / 2) & 0x1F);
        Self { time, date }
    }

    pub fn year(&self) -> u16 {
        (self.date >> 9) + 1980
    }

    pub fn month(&self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    pub fn day(&self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub fn hour(&self) -> u8 {
        (self.time >> 11) as u8
    }

    pub fn minute(&self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    pub fn second(&self) -> u8 {
        ((self.time & 0x1F) * 2) as u8
    }

    /// The current local time.
    #[cfg(feature = "std")]
    pub fn now() -> Self {
        use chrono::{Datelike, Local, Timelike};
        let now = Local::now();
        Self::from_parts(
            now.year().clamp(1980, 2107) as u16,
            now.month() as u8,
            now.day() as u8,
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
        )
    }

    #[cfg(not(feature = "std"))]
    pub fn now() -> Self {
        // No clock source without std; the FAT epoch stands in.
        Self::from_parts(1980, 1, 1, 0, 0, 0)
    }
}

impl core::fmt::Debug for FatTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

/// Seconds since the Unix epoch, used as the formatter's volume id.
#[cfg(feature = "std")]
pub fn wall_clock_seconds() -> u32 {
    chrono::Utc::now().timestamp() as u32
}

#[cfg(not(feature = "std"))]
pub fn wall_clock_seconds() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks() {
        let t = FatTime::from_parts(2024, 7, 15, 13, 45, 58);
        assert_eq!(t.year(), 2024);
        assert_eq!(t.month(), 7);
        assert_eq!(t.day(), 15);
        assert_eq!(t.hour(), 13);
        assert_eq!(t.minute(), 45);
        // 2-second granularity
        assert_eq!(t.second(), 58);
    }

    #[test]
    fn epoch_is_1980() {
        let t = FatTime::default();
        assert_eq!(t.year(), 1980);
        assert_eq!(t.time, 0);
        assert_eq!(t.date, 0);
    }

    #[test]
    fn odd_seconds_round_down() {
        let t = FatTime::from_parts(1999, 12, 31, 23, 59, 59);
        assert_eq!(t.second(), 58);
    }
}
