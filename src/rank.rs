//! Conversion-order (rank) bookkeeping
//!
//! Channels are attached to an ADC one at a time, often from several
//! configuration objects that do not know about each other. Each attachment
//! claims the next free position in its conversion group, so the counters
//! for all three physical ADCs live in one allocator that every [`Adc`]
//! instance shares.
//!
//! [`Adc`]: crate::adc::Adc

/// Identifies one of the three physical ADC peripherals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcNumber {
    /// ADC1
    Adc1,
    /// ADC2
    Adc2,
    /// ADC3
    Adc3,
}

impl AdcNumber {
    fn index(self) -> usize {
        match self {
            AdcNumber::Adc1 => 0,
            AdcNumber::Adc2 => 1,
            AdcNumber::Adc3 => 2,
        }
    }
}

/// Next-free-rank counters for the regular and injected conversion groups,
/// one slot per physical ADC.
///
/// Shared by reference between all [`Adc`] instances; see [`Adc::new`] for
/// the reset behaviour on construction.
///
/// [`Adc`]: crate::adc::Adc
/// [`Adc::new`]: crate::adc::Adc::new
#[derive(Debug)]
pub struct RankAllocator {
    regular: [u8; 3],
    injected: [u8; 3],
}

impl RankAllocator {
    /// Creates an allocator with every slot at rank 1.
    pub const fn new() -> Self {
        RankAllocator {
            regular: [1; 3],
            injected: [1; 3],
        }
    }

    /// Puts every slot of both groups back to rank 1.
    ///
    /// Any rank sequence that was in progress for *any* ADC starts over.
    pub fn reset(&mut self) {
        self.regular = [1; 3];
        self.injected = [1; 3];
    }

    /// Returns the next rank for a regular channel on `adc` and advances the
    /// slot. The first claim after a reset returns 1.
    pub fn claim_regular(&mut self, adc: AdcNumber) -> u8 {
        let rank = self.regular[adc.index()];
        self.regular[adc.index()] += 1;
        rank
    }

    /// Returns the next rank for an injected channel on `adc` and advances
    /// the slot. The first claim after a reset returns 1.
    pub fn claim_injected(&mut self, adc: AdcNumber) -> u8 {
        let rank = self.injected[adc.index()];
        self.injected[adc.index()] += 1;
        rank
    }
}

impl Default for RankAllocator {
    fn default() -> Self {
        RankAllocator::new()
    }
}
