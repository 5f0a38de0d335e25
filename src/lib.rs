//! ADC driver core for the STM32F1 family
//!
//! Covers the parts of the ADC that are shared between standalone and
//! dual-mode (master/slave) operation: conversion-order (rank) bookkeeping
//! for the regular and injected groups, the one-time self-calibration
//! sequence, and software-triggered regular conversions.
//!
//! The hardware seam is the [`adc::AdcPeripheral`] trait; [`regs`] provides
//! the memory-mapped implementation for ADC1..ADC3, and tests run against an
//! in-memory fake.
//!
//! ```no_run
//! use core::cell::RefCell;
//! use stm32f1xx_adc::adc::Adc;
//! use stm32f1xx_adc::rank::RankAllocator;
//!
//! let ranks = RefCell::new(RankAllocator::new());
//! let mut adc = Adc::new(unsafe { stm32f1xx_adc::regs::ADC1::steal() }, None, &ranks);
//!
//! adc.apply_config();
//! adc.enable();
//!
//! adc.start_regular_conversion();
//! while !adc.has_regular_conversion_finished() {}
//! let sample = adc.regular_conversion_value();
//! # let _ = sample;
//! ```

#![deny(missing_docs)]
#![cfg_attr(not(test), no_std)]

pub mod adc;
pub mod rank;
pub mod regs;
