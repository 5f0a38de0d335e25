//! Memory-mapped register access for ADC1..ADC3
//!
//! [`RegisterBlock`] mirrors the F1 ADC register map and carries the one
//! [`AdcPeripheral`] implementation; `ADC1`/`ADC2`/`ADC3` are zero-sized
//! handles that deref to the block at the peripheral's base address.

use core::marker::PhantomData;
use core::ops::Deref;

use vcell::VolatileCell;

use crate::adc::{AdcPeripheral, Config};
use crate::rank::AdcNumber;

/// ADC register map
#[repr(C)]
pub struct RegisterBlock {
    /// status register
    pub sr: VolatileCell<u32>,
    /// control register 1
    pub cr1: VolatileCell<u32>,
    /// control register 2
    pub cr2: VolatileCell<u32>,
    /// sample time register 1 (channels 10..17)
    pub smpr1: VolatileCell<u32>,
    /// sample time register 2 (channels 0..9)
    pub smpr2: VolatileCell<u32>,
    /// injected channel data offset registers
    pub jofr: [VolatileCell<u32>; 4],
    /// watchdog higher threshold register
    pub htr: VolatileCell<u32>,
    /// watchdog lower threshold register
    pub ltr: VolatileCell<u32>,
    /// regular sequence register 1
    pub sqr1: VolatileCell<u32>,
    /// regular sequence register 2
    pub sqr2: VolatileCell<u32>,
    /// regular sequence register 3
    pub sqr3: VolatileCell<u32>,
    /// injected sequence register
    pub jsqr: VolatileCell<u32>,
    /// injected data registers
    pub jdr: [VolatileCell<u32>; 4],
    /// regular data register
    pub dr: VolatileCell<u32>,
}

const SR_EOC: u32 = 1 << 1;

const CR1_SCAN: u32 = 1 << 8;
const CR1_DUALMOD_MASK: u32 = 0b1111 << 16;

const CR2_ADON: u32 = 1 << 0;
const CR2_CONT: u32 = 1 << 1;
const CR2_CAL: u32 = 1 << 2;
const CR2_RSTCAL: u32 = 1 << 3;
const CR2_ALIGN: u32 = 1 << 11;
const CR2_EXTSEL_MASK: u32 = 0b111 << 17;
const CR2_EXTTRIG: u32 = 1 << 20;
const CR2_SWSTART: u32 = 1 << 22;

const SQR1_L_MASK: u32 = 0b1111 << 20;
const SQR3_SQ1_MASK: u32 = 0b11111;

fn modify(cell: &VolatileCell<u32>, clear: u32, set: u32) {
    cell.set((cell.get() & !clear) | set);
}

impl AdcPeripheral for RegisterBlock {
    fn set_enabled(&self, enabled: bool) {
        if enabled {
            modify(&self.cr2, 0, CR2_ADON);
        } else {
            modify(&self.cr2, CR2_ADON, 0);
        }
    }

    fn apply_config(&self, config: &Config) {
        modify(&self.cr1, CR1_DUALMOD_MASK | CR1_SCAN, config.cr1_bits());
        modify(
            &self.cr2,
            CR2_EXTSEL_MASK | CR2_ALIGN | CR2_CONT,
            config.cr2_bits(),
        );
        modify(&self.sqr1, SQR1_L_MASK, config.sqr1_bits());
    }

    fn select_regular_channel(&self, channel: u8) {
        modify(&self.sqr3, SQR3_SQ1_MASK, u32::from(channel) & SQR3_SQ1_MASK);
        // sequence length 1
        modify(&self.sqr1, SQR1_L_MASK, 0);
    }

    fn reset_calibration(&self) {
        modify(&self.cr2, 0, CR2_RSTCAL);
    }

    fn calibration_reset_pending(&self) -> bool {
        self.cr2.get() & CR2_RSTCAL != 0
    }

    fn start_calibration(&self) {
        modify(&self.cr2, 0, CR2_CAL);
    }

    fn calibration_pending(&self) -> bool {
        self.cr2.get() & CR2_CAL != 0
    }

    fn start_regular_conversion(&self) {
        // a software start only fires with the external trigger enabled,
        // EXTTRIG and SWSTART are set together
        modify(&self.cr2, 0, CR2_EXTTRIG | CR2_SWSTART);
    }

    fn software_start_pending(&self) -> bool {
        self.cr2.get() & CR2_SWSTART != 0
    }

    fn end_of_conversion(&self) -> bool {
        self.sr.get() & SR_EOC != 0
    }

    fn conversion_value(&self) -> u16 {
        self.dr.get() as u16
    }
}

macro_rules! adc_handles {
    ($($ADC:ident: ($num:ident, $addr:literal),)+) => {
        $(
            #[doc = concat!("Peripheral handle for ", stringify!($ADC))]
            pub struct $ADC {
                _marker: PhantomData<*const ()>,
            }

            unsafe impl Send for $ADC {}

            impl $ADC {
                /// Base address of the register block
                pub const PTR: *const RegisterBlock = $addr as *const RegisterBlock;

                /// The physical ADC this handle stands for
                pub const NUMBER: AdcNumber = AdcNumber::$num;

                /// Creates the handle.
                ///
                /// # Safety
                ///
                /// The caller must make sure no other handle for the same
                /// peripheral is in use.
                pub unsafe fn steal() -> Self {
                    $ADC {
                        _marker: PhantomData,
                    }
                }
            }

            impl Deref for $ADC {
                type Target = RegisterBlock;

                fn deref(&self) -> &RegisterBlock {
                    unsafe { &*Self::PTR }
                }
            }

            impl AdcPeripheral for $ADC {
                fn set_enabled(&self, enabled: bool) {
                    (**self).set_enabled(enabled)
                }

                fn apply_config(&self, config: &Config) {
                    (**self).apply_config(config)
                }

                fn select_regular_channel(&self, channel: u8) {
                    (**self).select_regular_channel(channel)
                }

                fn reset_calibration(&self) {
                    (**self).reset_calibration()
                }

                fn calibration_reset_pending(&self) -> bool {
                    (**self).calibration_reset_pending()
                }

                fn start_calibration(&self) {
                    (**self).start_calibration()
                }

                fn calibration_pending(&self) -> bool {
                    (**self).calibration_pending()
                }

                fn start_regular_conversion(&self) {
                    (**self).start_regular_conversion()
                }

                fn software_start_pending(&self) -> bool {
                    (**self).software_start_pending()
                }

                fn end_of_conversion(&self) -> bool {
                    (**self).end_of_conversion()
                }

                fn conversion_value(&self) -> u16 {
                    (**self).conversion_value()
                }
            }
        )+
    };
}

adc_handles! {
    ADC1: (Adc1, 0x4001_2400),
    ADC2: (Adc2, 0x4001_2800),
    ADC3: (Adc3, 0x4001_3C00),
}
