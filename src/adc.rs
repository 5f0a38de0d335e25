//! # API for the Analog to Digital converter
//!
//! One [`Adc`] is constructed per physical peripheral (ADC1..ADC3), either
//! standalone or as the slave half of a dual-mode pair. Channel configuration
//! is cooperative: feature objects claim conversion ranks through the shared
//! [`RankAllocator`], bump the injected-channel count and edit the [`Config`]
//! payload through [`Adc::config_mut`], and the assembled configuration is
//! pushed to the hardware with [`Adc::apply_config`] before [`Adc::enable`].
//!
//! The first [`Adc::enable`] runs the self-calibration sequence; afterwards a
//! regular conversion is a start / poll / read cycle:
//!
//! ```ignore
//! adc.start_regular_conversion();
//! while !adc.has_regular_conversion_finished() {}
//! let raw = adc.regular_conversion_value();
//! ```

use core::cell::RefCell;
use core::convert::Infallible;

use embedded_hal::adc::{Channel, OneShot};

use crate::rank::{AdcNumber, RankAllocator};

/// ADC data register alignment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Align {
    /// Right alignment of output data
    Right,
    /// Left alignment of output data
    Left,
}

impl Default for Align {
    /// Default: right alignment
    fn default() -> Self {
        Align::Right
    }
}

impl From<Align> for bool {
    fn from(val: Align) -> Self {
        match val {
            Align::Right => false,
            Align::Left => true,
        }
    }
}

/// Trigger source for the regular conversion group (EXTSEL encoding)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerSource {
    /// Timer 1 capture/compare 1
    Tim1Cc1,
    /// Timer 1 capture/compare 2
    Tim1Cc2,
    /// Timer 1 capture/compare 3
    Tim1Cc3,
    /// Timer 2 capture/compare 2
    Tim2Cc2,
    /// Timer 3 TRGO event
    Tim3Trgo,
    /// Timer 4 capture/compare 4
    Tim4Cc4,
    /// EXTI line 11
    Exti11,
    /// Software start (SWSTART)
    Software,
}

impl Default for TriggerSource {
    /// Default: software start
    fn default() -> Self {
        TriggerSource::Software
    }
}

impl From<TriggerSource> for u8 {
    fn from(val: TriggerSource) -> Self {
        use TriggerSource::*;
        match val {
            Tim1Cc1 => 0b000,
            Tim1Cc2 => 0b001,
            Tim1Cc3 => 0b010,
            Tim2Cc2 => 0b011,
            Tim3Trgo => 0b100,
            Tim4Cc4 => 0b101,
            Exti11 => 0b110,
            Software => 0b111,
        }
    }
}

/// Dual-mode selection (DUALMOD encoding)
///
/// Anything other than `Independent` pairs ADC1 (master) with ADC2 (slave);
/// the slave side carries a reference back to its master, see [`Adc::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DualMode {
    /// Both ADCs run on their own
    Independent,
    /// Injected groups convert simultaneously
    InjectedSimultaneous,
    /// Regular groups convert simultaneously
    RegularSimultaneous,
    /// Fast interleaved sampling of one regular channel
    FastInterleaved,
    /// Slow interleaved sampling of one regular channel
    SlowInterleaved,
    /// Regular and injected triggers alternate between the pair
    AlternateTrigger,
}

impl Default for DualMode {
    /// Default: independent operation
    fn default() -> Self {
        DualMode::Independent
    }
}

impl From<DualMode> for u8 {
    fn from(val: DualMode) -> Self {
        use DualMode::*;
        match val {
            Independent => 0b0000,
            InjectedSimultaneous => 0b0101,
            RegularSimultaneous => 0b0110,
            FastInterleaved => 0b0111,
            SlowInterleaved => 0b1000,
            AlternateTrigger => 0b1001,
        }
    }
}

/// Configuration payload for one ADC instance
///
/// Starts out as an empty software-triggered setup; channel feature objects
/// edit it in place through [`Adc::config_mut`] while they claim ranks, and
/// [`Adc::apply_config`] writes the final state to the control registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Dual-mode selection
    pub mode: DualMode,
    /// Convert the whole regular sequence instead of a single channel
    pub scan: bool,
    /// Restart the regular sequence as soon as it finishes
    pub continuous: bool,
    /// Trigger source for the regular group
    pub trigger: TriggerSource,
    /// Data register alignment
    pub align: Align,
    /// Number of channels in the regular sequence
    pub channel_count: u8,
}

impl Default for Config {
    /// Single software-triggered conversion, right-aligned, no channels yet
    fn default() -> Self {
        Config {
            mode: DualMode::Independent,
            scan: false,
            continuous: false,
            trigger: TriggerSource::Software,
            align: Align::Right,
            channel_count: 0,
        }
    }
}

impl Config {
    /// CR1 image: DUALMOD[19:16], SCAN[8]
    pub(crate) fn cr1_bits(&self) -> u32 {
        (u32::from(u8::from(self.mode)) << 16) | ((self.scan as u32) << 8)
    }

    /// CR2 image: EXTSEL[19:17], ALIGN[11], CONT[1]
    pub(crate) fn cr2_bits(&self) -> u32 {
        (u32::from(u8::from(self.trigger)) << 17)
            | ((bool::from(self.align) as u32) << 11)
            | ((self.continuous as u32) << 1)
    }

    /// SQR1 image: L[23:20] holds `channel_count - 1`
    pub(crate) fn sqr1_bits(&self) -> u32 {
        u32::from(self.channel_count.saturating_sub(1)) << 20
    }
}

/// Register-level operations one physical ADC must provide.
///
/// Implemented by the memory-mapped [`RegisterBlock`] (and the `ADC1..ADC3`
/// handles) for real hardware, and by in-memory fakes in tests. All methods
/// take `&self`: the hardware side is volatile and interior mutability is
/// the natural shape for a fake as well.
///
/// [`RegisterBlock`]: crate::regs::RegisterBlock
pub trait AdcPeripheral {
    /// Switch the converter on or off (ADON)
    fn set_enabled(&self, enabled: bool);

    /// Write a [`Config`] image to the control and sequence registers
    fn apply_config(&self, config: &Config);

    /// Make `channel` the only entry of the regular sequence
    fn select_regular_channel(&self, channel: u8);

    /// Issue the reset-calibration command (RSTCAL)
    fn reset_calibration(&self);

    /// True while the reset-calibration command is still running
    fn calibration_reset_pending(&self) -> bool;

    /// Issue the start-calibration command (CAL)
    fn start_calibration(&self);

    /// True while the calibration is still running
    fn calibration_pending(&self) -> bool;

    /// Request a software-triggered regular conversion (SWSTART)
    fn start_regular_conversion(&self);

    /// True while SWSTART is still set, i.e. the conversion has not begun
    fn software_start_pending(&self) -> bool;

    /// State of the end-of-conversion flag (EOC)
    fn end_of_conversion(&self) -> bool;

    /// Contents of the regular data register
    fn conversion_value(&self) -> u16;
}

/// One physical ADC instance
///
/// Owns the peripheral handle and the [`Config`] payload, knows its dual-mode
/// master (if any), and shares the rank counters with every other instance.
pub struct Adc<'r, P> {
    periph: P,
    config: Config,
    master: Option<AdcNumber>,
    injected_channel_count: u8,
    calibrated: bool,
    ranks: &'r RefCell<RankAllocator>,
}

impl<'r, P: AdcPeripheral> Adc<'r, P> {
    /// Creates the instance for one physical ADC.
    ///
    /// `master` is the ADC this one is slaved to in dual mode, `None` for
    /// standalone operation. The master does not track its slaves, so
    /// construct it first and configure the pair through its own handle.
    ///
    /// Construction rewinds *all* rank slots in `ranks` to 1, not just the
    /// slots of the ADC being constructed. Construct every instance before
    /// any channel features start claiming ranks, otherwise the claims made
    /// so far start over.
    pub fn new(periph: P, master: Option<AdcNumber>, ranks: &'r RefCell<RankAllocator>) -> Self {
        ranks.borrow_mut().reset();

        Adc {
            periph,
            config: Config::default(),
            master,
            injected_channel_count: 0,
            calibrated: false,
            ranks,
        }
    }

    /// Switches the converter on.
    ///
    /// The first call also runs the self-calibration sequence and latches
    /// the calibrated flag; later calls only set ADON. Blocks until the
    /// calibration is done.
    pub fn enable(&mut self) {
        self.periph.set_enabled(true);

        if !self.calibrated {
            self.calibrate();
            self.calibrated = true;
        }
    }

    /// Switches the converter off. The calibrated flag is kept, a later
    /// [`enable`](Adc::enable) will not recalibrate.
    pub fn disable(&mut self) {
        self.periph.set_enabled(false);
    }

    /// Runs the self-calibration sequence: reset the calibration registers,
    /// wait for the reset to finish, start the calibration, wait for it to
    /// finish.
    ///
    /// Spins on the hardware status bits with no timeout; a dead peripheral
    /// blocks here forever. Happens automatically on the first
    /// [`enable`](Adc::enable); calling it again recalibrates on demand and
    /// leaves the calibrated flag alone.
    pub fn calibrate(&self) {
        self.periph.reset_calibration();
        while self.periph.calibration_reset_pending() {}

        self.periph.start_calibration();
        while self.periph.calibration_pending() {}
    }

    /// Writes the current [`Config`] payload to the hardware. Call after
    /// the channel features are done editing it and before
    /// [`enable`](Adc::enable).
    pub fn apply_config(&self) {
        self.periph.apply_config(&self.config);
    }

    /// Starts a regular conversion by software command (sets SWSTART).
    pub fn start_regular_conversion(&self) {
        self.periph.start_regular_conversion();
    }

    /// True once the requested regular conversion has begun. The hardware
    /// clears SWSTART the moment the conversion starts, so "started" is the
    /// absence of the bit.
    pub fn has_regular_conversion_started(&self) -> bool {
        !self.periph.software_start_pending()
    }

    /// True when a regular conversion result is ready (EOC set). Reading the
    /// flag through this predicate does not clear it.
    pub fn has_regular_conversion_finished(&self) -> bool {
        self.periph.end_of_conversion()
    }

    /// Raw contents of the regular data register. Poll
    /// [`has_regular_conversion_finished`](Adc::has_regular_conversion_finished)
    /// first; reading early yields a stale value.
    pub fn regular_conversion_value(&self) -> u16 {
        self.periph.conversion_value()
    }

    /// Non-blocking read of the regular conversion result:
    /// [`nb::Error::WouldBlock`] until the end-of-conversion flag is set.
    pub fn read_regular(&mut self) -> nb::Result<u16, Infallible> {
        if self.periph.end_of_conversion() {
            Ok(self.periph.conversion_value())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    /// Claims the next free rank in the regular sequence of `adc`.
    ///
    /// Ranks start at 1 and count up with each claim. The counters are
    /// shared between all instances, so a feature object can claim through
    /// whichever instance it holds.
    pub fn claim_regular_rank(&mut self, adc: AdcNumber) -> u8 {
        self.ranks.borrow_mut().claim_regular(adc)
    }

    /// Claims the next free rank in the injected sequence of `adc`.
    pub fn claim_injected_rank(&mut self, adc: AdcNumber) -> u8 {
        self.ranks.borrow_mut().claim_injected(adc)
    }

    /// Adds `amount` attached injected channels to this instance's count.
    pub fn increment_injected_channel_count(&mut self, amount: u8) {
        self.injected_channel_count += amount;
    }

    /// Number of injected channels attached so far.
    pub fn injected_channel_count(&self) -> u8 {
        self.injected_channel_count
    }

    /// True once the first [`enable`](Adc::enable) has calibrated the
    /// converter.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// The master this instance is slaved to, `None` when standalone.
    pub fn master(&self) -> Option<AdcNumber> {
        self.master
    }

    /// The underlying peripheral handle.
    pub fn periph(&self) -> &P {
        &self.periph
    }

    /// The configuration payload.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable access to the configuration payload for channel feature
    /// objects. Edits only reach the hardware through
    /// [`apply_config`](Adc::apply_config).
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }
}

impl<P, WORD, PIN> OneShot<P, WORD, PIN> for Adc<'_, P>
where
    P: AdcPeripheral,
    WORD: From<u16>,
    PIN: Channel<P, ID = u8>,
{
    type Error = ();

    /// Converts the pin's channel once: single-entry regular sequence,
    /// software start, spin on EOC, read. Blocks for the duration of the
    /// conversion and never returns `WouldBlock`.
    fn read(&mut self, _pin: &mut PIN) -> nb::Result<WORD, Self::Error> {
        self.periph.select_regular_channel(PIN::channel());
        self.periph.start_regular_conversion();
        while !self.periph.end_of_conversion() {}

        Ok(self.periph.conversion_value().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[derive(Default)]
    struct MockAdc {
        enabled: Cell<bool>,
        commands: RefCell<Vec<&'static str>>,
        reset_cal_polls_left: Cell<u32>,
        cal_polls_left: Cell<u32>,
        swstart: Cell<bool>,
        eoc: Cell<bool>,
        // finish the conversion the instant it is started
        instant_conversion: Cell<bool>,
        selected_channel: Cell<Option<u8>>,
        applied: Cell<Option<Config>>,
        data: Cell<u16>,
    }

    impl MockAdc {
        fn commands(&self) -> Vec<&'static str> {
            self.commands.borrow().clone()
        }
    }

    impl AdcPeripheral for MockAdc {
        fn set_enabled(&self, enabled: bool) {
            self.enabled.set(enabled);
        }

        fn apply_config(&self, config: &Config) {
            self.applied.set(Some(*config));
        }

        fn select_regular_channel(&self, channel: u8) {
            self.selected_channel.set(Some(channel));
        }

        fn reset_calibration(&self) {
            self.commands.borrow_mut().push("rstcal");
            self.reset_cal_polls_left.set(2);
        }

        fn calibration_reset_pending(&self) -> bool {
            let left = self.reset_cal_polls_left.get();
            if left > 0 {
                self.reset_cal_polls_left.set(left - 1);
            }
            left > 0
        }

        fn start_calibration(&self) {
            // a start while the reset is still pending would calibrate
            // against dirty calibration registers
            assert_eq!(self.reset_cal_polls_left.get(), 0);
            self.commands.borrow_mut().push("cal");
            self.cal_polls_left.set(2);
        }

        fn calibration_pending(&self) -> bool {
            let left = self.cal_polls_left.get();
            if left > 0 {
                self.cal_polls_left.set(left - 1);
            }
            left > 0
        }

        fn start_regular_conversion(&self) {
            if self.instant_conversion.get() {
                self.eoc.set(true);
            } else {
                self.swstart.set(true);
            }
        }

        fn software_start_pending(&self) -> bool {
            self.swstart.get()
        }

        fn end_of_conversion(&self) -> bool {
            self.eoc.get()
        }

        fn conversion_value(&self) -> u16 {
            self.data.get()
        }
    }

    fn fresh_ranks() -> RefCell<RankAllocator> {
        RefCell::new(RankAllocator::new())
    }

    #[test]
    fn construction_resets_every_rank_slot() {
        let ranks = fresh_ranks();
        {
            let mut pre = ranks.borrow_mut();
            for adc in [AdcNumber::Adc1, AdcNumber::Adc2, AdcNumber::Adc3] {
                pre.claim_regular(adc);
                pre.claim_injected(adc);
            }
        }

        let mut adc = Adc::new(MockAdc::default(), None, &ranks);

        for num in [AdcNumber::Adc1, AdcNumber::Adc2, AdcNumber::Adc3] {
            assert_eq!(adc.claim_regular_rank(num), 1);
            assert_eq!(adc.claim_injected_rank(num), 1);
        }
    }

    #[test]
    fn constructing_a_second_instance_rewinds_in_flight_claims() {
        let ranks = fresh_ranks();
        let mut adc1 = Adc::new(MockAdc::default(), None, &ranks);

        assert_eq!(adc1.claim_regular_rank(AdcNumber::Adc1), 1);
        assert_eq!(adc1.claim_regular_rank(AdcNumber::Adc1), 2);

        // a late ADC2 construction while ADC1 attachment is in progress
        let _adc2 = Adc::new(MockAdc::default(), Some(AdcNumber::Adc1), &ranks);

        assert_eq!(adc1.claim_regular_rank(AdcNumber::Adc1), 1);
    }

    #[test]
    fn enable_calibrates_exactly_once() {
        let ranks = fresh_ranks();
        let mut adc = Adc::new(MockAdc::default(), None, &ranks);
        assert!(!adc.is_calibrated());

        adc.enable();
        assert!(adc.periph().enabled.get());
        assert_eq!(adc.periph().commands(), ["rstcal", "cal"]);
        assert!(adc.is_calibrated());

        adc.disable();
        assert!(!adc.periph().enabled.get());
        assert!(adc.is_calibrated());

        adc.enable();
        assert_eq!(adc.periph().commands(), ["rstcal", "cal"]);
    }

    #[test]
    fn explicit_recalibration_reruns_the_sequence() {
        let ranks = fresh_ranks();
        let mut adc = Adc::new(MockAdc::default(), None, &ranks);
        adc.enable();

        adc.calibrate();
        assert_eq!(adc.periph().commands(), ["rstcal", "cal", "rstcal", "cal"]);
        assert!(adc.is_calibrated());
    }

    #[test]
    fn started_predicate_tracks_swstart_clearing() {
        let ranks = fresh_ranks();
        let adc = Adc::new(MockAdc::default(), None, &ranks);

        adc.start_regular_conversion();
        assert!(!adc.has_regular_conversion_started());

        // hardware clears SWSTART when the conversion begins
        adc.periph().swstart.set(false);
        assert!(adc.has_regular_conversion_started());
    }

    #[test]
    fn finished_predicate_mirrors_eoc_without_clearing_it() {
        let ranks = fresh_ranks();
        let adc = Adc::new(MockAdc::default(), None, &ranks);

        assert!(!adc.has_regular_conversion_finished());

        adc.periph().eoc.set(true);
        adc.periph().data.set(0x0abc);
        assert!(adc.has_regular_conversion_finished());
        assert_eq!(adc.regular_conversion_value(), 0x0abc);
        assert!(adc.has_regular_conversion_finished());
    }

    #[test]
    fn read_regular_blocks_until_eoc() {
        let ranks = fresh_ranks();
        let mut adc = Adc::new(MockAdc::default(), None, &ranks);

        assert_eq!(adc.read_regular(), Err(nb::Error::WouldBlock));

        adc.periph().eoc.set(true);
        adc.periph().data.set(0x0321);
        assert_eq!(adc.read_regular(), Ok(0x0321));
    }

    #[test]
    fn injected_channel_count_accumulates() {
        let ranks = fresh_ranks();
        let mut adc = Adc::new(MockAdc::default(), None, &ranks);

        adc.increment_injected_channel_count(3);
        adc.increment_injected_channel_count(2);
        assert_eq!(adc.injected_channel_count(), 5);
    }

    #[test]
    fn master_reference_is_kept() {
        let ranks = fresh_ranks();
        let standalone = Adc::new(MockAdc::default(), None, &ranks);
        assert_eq!(standalone.master(), None);

        let slave = Adc::new(MockAdc::default(), Some(AdcNumber::Adc1), &ranks);
        assert_eq!(slave.master(), Some(AdcNumber::Adc1));
    }

    #[test]
    fn config_edits_reach_hardware_on_apply() {
        let ranks = fresh_ranks();
        let mut adc = Adc::new(MockAdc::default(), None, &ranks);
        assert_eq!(*adc.config(), Config::default());

        adc.config_mut().trigger = TriggerSource::Tim3Trgo;
        adc.config_mut().channel_count = 4;
        assert_eq!(adc.periph().applied.get(), None);

        adc.apply_config();
        let applied = adc.periph().applied.get().unwrap();
        assert_eq!(applied.trigger, TriggerSource::Tim3Trgo);
        assert_eq!(applied.channel_count, 4);
    }

    #[test]
    fn one_shot_selects_the_pin_channel() {
        struct Pb0;
        impl Channel<MockAdc> for Pb0 {
            type ID = u8;
            fn channel() -> u8 {
                8
            }
        }

        let ranks = fresh_ranks();
        let mut adc = Adc::new(MockAdc::default(), None, &ranks);
        adc.periph().instant_conversion.set(true);
        adc.periph().data.set(0x07ff);
        adc.enable();

        let sample: u16 = adc.read(&mut Pb0).unwrap();
        assert_eq!(sample, 0x07ff);
        assert_eq!(adc.periph().selected_channel.get(), Some(8));
    }

    #[test]
    fn default_config_register_images() {
        let config = Config::default();
        assert_eq!(config.cr1_bits(), 0);
        // software trigger is EXTSEL = 0b111
        assert_eq!(config.cr2_bits(), 0b111 << 17);
        assert_eq!(config.sqr1_bits(), 0);
    }

    #[test]
    fn config_register_images_cover_every_field() {
        let config = Config {
            mode: DualMode::RegularSimultaneous,
            scan: true,
            continuous: true,
            trigger: TriggerSource::Tim1Cc2,
            align: Align::Left,
            channel_count: 4,
        };

        assert_eq!(config.cr1_bits(), (0b0110 << 16) | (1 << 8));
        assert_eq!(config.cr2_bits(), (0b001 << 17) | (1 << 11) | (1 << 1));
        assert_eq!(config.sqr1_bits(), 3 << 20);
    }
}
