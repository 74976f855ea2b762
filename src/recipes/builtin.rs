// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Built-in SPIRou and NIRPS-HA recipes.
//!
//! The numerical reductions live outside the orchestrator. These bodies
//! combine their inputs, measure simple statistics for quality control and
//! write products that honour the header contract, so every recipe can be
//! planned, scheduled and committed end to end.

use std::sync::Arc;
use std::time::Duration;

use super::args::ArgSpec;
use super::context::RecipeContext;
use super::recipe::{CalibRequirement, Grouping, Recipe};
use super::registry::RecipeRegistry;
use crate::config::Instrument;
use crate::errors::RecipeError;
use crate::files::{DrsFile, DrsFileSpec, FileKind};

/// File types of one instrument, shared by every built-in recipe.
#[derive(Debug, Clone)]
pub struct FileCatalogue {
    pub science_fiber: String,
    pub raw_any: Arc<DrsFileSpec>,
    pub dark_pp: Arc<DrsFileSpec>,
    pub flat_pp: Arc<DrsFileSpec>,
    pub loc_pp: Arc<DrsFileSpec>,
    pub hc_pp: Arc<DrsFileSpec>,
    pub fp_pp: Arc<DrsFileSpec>,
    pub science_pp: Arc<DrsFileSpec>,
    pub pp: Arc<DrsFileSpec>,
    pub dark_ref: Arc<DrsFileSpec>,
    pub dark: Arc<DrsFileSpec>,
    pub badpix: Arc<DrsFileSpec>,
    pub bkgrd: Arc<DrsFileSpec>,
    pub order_profile: Arc<DrsFileSpec>,
    pub loc: Arc<DrsFileSpec>,
    pub flat: Arc<DrsFileSpec>,
    pub blaze: Arc<DrsFileSpec>,
    pub wave: Arc<DrsFileSpec>,
    pub e2ds: Vec<Arc<DrsFileSpec>>,
    pub s1d: Arc<DrsFileSpec>,
    pub tellu_trans: Arc<DrsFileSpec>,
    pub tellu_obj: Arc<DrsFileSpec>,
    pub tellu_corr: Arc<DrsFileSpec>,
}

impl FileCatalogue {
    pub fn new(instrument: &Instrument) -> Self {
        let sci = instrument
            .fibers
            .first()
            .cloned()
            .unwrap_or_else(|| "AB".to_string());
        let known: Vec<&str> = instrument.identifier.dprtypes().collect();
        let raw = |name: &str, dprtypes: &[&str]| {
            let kept: Vec<&str> = dprtypes
                .iter()
                .copied()
                .filter(|d| known.contains(d))
                .collect();
            Arc::new(DrsFileSpec::raw(name, &kept))
        };
        let pp = |raw: &Arc<DrsFileSpec>| Arc::new(DrsFileSpec::preprocessed(raw));
        let calib = |name: &str, suffix: &str, key: &str, fiber: Option<&str>| {
            let spec = DrsFileSpec::output(name, FileKind::Calibration, suffix).with_calib_key(key);
            Arc::new(match fiber {
                Some(fiber) => spec.with_fiber(fiber),
                None => spec,
            })
        };

        let raw_any = Arc::new(DrsFileSpec::raw("RAW", &[]));
        let science_raw = raw(
            "OBJ",
            &["OBJ_FP", "OBJ_DARK", "OBJ_SKY", "POLAR_FP", "POLAR_DARK", "TELLU_SKY"],
        );
        let science_pp = pp(&science_raw);

        let e2ds: Vec<Arc<DrsFileSpec>> = instrument
            .fibers
            .iter()
            .map(|fiber| {
                Arc::new(
                    DrsFileSpec::output(&format!("E2DS_{fiber}"), FileKind::Reduced, "_e2ds")
                        .with_fiber(fiber)
                        .derived_from(&science_pp),
                )
            })
            .collect();

        Self {
            dark_pp: pp(&raw("DARK_DARK", &["DARK_DARK_INT", "DARK_DARK_TEL", "DARK_DARK"])),
            flat_pp: pp(&raw("FLAT_FLAT", &["FLAT_FLAT"])),
            loc_pp: pp(&raw("LOC", &["DARK_FLAT", "FLAT_DARK"])),
            hc_pp: pp(&raw("HC", &["HCONE_HCONE"])),
            fp_pp: pp(&raw("FP", &["FP_FP"])),
            pp: Arc::new(DrsFileSpec::output("PP", FileKind::Preprocessed, "_pp").derived_from(&raw_any)),
            dark_ref: Arc::new(
                DrsFileSpec::output("DARK_REF", FileKind::Calibration, "_dark_ref")
                    .with_calib_key("DARK_REF")
                    .reference()
                    .depends_on(&["DARK_QMIN", "DARK_QMAX"]),
            ),
            dark: calib("DARK", "_dark", "DARK", Some(&sci)),
            badpix: calib("BADPIX", "_badpixel", "BADPIX", None),
            bkgrd: calib("BKGRDMAP", "_bmap", "BKGRDMAP", None),
            order_profile: calib("ORDER_PROFILE", "_order_profile", "ORDER_PROFILE", Some(&sci)),
            loc: calib("LOC", "_loco", "LOC", Some(&sci)),
            flat: calib("FLAT", "_flat", "FLAT", Some(&sci)),
            blaze: calib("BLAZE", "_blaze", "BLAZE", Some(&sci)),
            wave: calib("WAVE", "_wave", "WAVE", Some(&sci)),
            s1d: Arc::new(
                DrsFileSpec::output("S1D", FileKind::Reduced, "_s1d")
                    .with_fiber(&sci)
                    .derived_from(&science_pp),
            ),
            tellu_trans: Arc::new(
                DrsFileSpec::output("TELLU_TRANS", FileKind::Telluric, "_trans")
                    .with_calib_key("TELLU_TRANS")
                    .with_fiber(&sci),
            ),
            tellu_obj: Arc::new(
                DrsFileSpec::output("TELLU_OBJ", FileKind::Telluric, "_tellu_obj")
                    .with_calib_key("TELLU_OBJ")
                    .with_fiber(&sci),
            ),
            tellu_corr: Arc::new(
                DrsFileSpec::output("TELLU_CORR", FileKind::Reduced, "_tcorr")
                    .with_fiber(&sci)
                    .derived_from(&e2ds[0]),
            ),
            e2ds,
            raw_any,
            science_pp,
            science_fiber: sci,
        }
    }

    /// Extracted spectrum of the science fiber.
    pub fn science_e2ds(&self) -> &Arc<DrsFileSpec> {
        &self.e2ds[0]
    }
}

/// Register every built-in recipe for `instrument`.
pub fn register_all(registry: &mut RecipeRegistry, instrument: &Instrument) {
    let files = FileCatalogue::new(instrument);
    let name = instrument.name.as_str();
    let sci = Some(files.science_fiber.as_str());

    registry.register(
        Recipe::new("apero_preprocess", name, preprocess)
            .describe("Pre-process raw frames")
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("files", vec![Arc::clone(&files.raw_any)]))
            .output(Arc::clone(&files.pp))
            .grouping(Grouping::PerFile)
            .wall_time(Duration::from_secs(600)),
    );

    registry.register(
        Recipe::new("apero_dark_ref", name, dark_ref)
            .describe("Reference dark over every night")
            .arg(ArgSpec::files("files", vec![Arc::clone(&files.dark_pp)]))
            .output(Arc::clone(&files.dark_ref))
            .grouping(Grouping::All)
            .priority(1),
    );

    registry.register(
        Recipe::new("apero_dark", name, dark)
            .describe("Nightly dark")
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("files", vec![Arc::clone(&files.dark_pp)]))
            .calibration(CalibRequirement::calib("DARK_REF", None).optional())
            .output(Arc::clone(&files.dark))
            .priority(2),
    );

    registry.register(
        Recipe::new("apero_badpix", name, badpix)
            .describe("Bad pixel and background maps")
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("flatfiles", vec![Arc::clone(&files.flat_pp)]))
            .arg(ArgSpec::files("darkfiles", vec![Arc::clone(&files.dark_pp)]).optional())
            .calibration(CalibRequirement::calib("DARK", sci))
            .output(Arc::clone(&files.badpix))
            .output(Arc::clone(&files.bkgrd))
            .priority(3),
    );

    registry.register(
        Recipe::new("apero_loc", name, localisation)
            .describe("Order localisation")
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("files", vec![Arc::clone(&files.loc_pp)]))
            .calibration(CalibRequirement::calib("DARK", sci))
            .calibration(CalibRequirement::calib("BADPIX", None))
            .output(Arc::clone(&files.order_profile))
            .output(Arc::clone(&files.loc))
            .priority(4),
    );

    registry.register(
        Recipe::new("apero_flat", name, flat)
            .describe("Flat field and blaze")
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("files", vec![Arc::clone(&files.flat_pp)]))
            .calibration(CalibRequirement::calib("BADPIX", None))
            .calibration(CalibRequirement::calib("ORDER_PROFILE", sci))
            .calibration(CalibRequirement::calib("LOC", sci))
            .output(Arc::clone(&files.flat))
            .output(Arc::clone(&files.blaze))
            .priority(5),
    );

    registry.register(
        Recipe::new("apero_wave", name, wave)
            .describe("Nightly wavelength solution")
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("hcfiles", vec![Arc::clone(&files.hc_pp)]))
            .arg(ArgSpec::files("fpfiles", vec![Arc::clone(&files.fp_pp)]).optional())
            .calibration(CalibRequirement::calib("LOC", sci))
            .calibration(CalibRequirement::calib("FLAT", sci))
            .calibration(CalibRequirement::calib("BLAZE", sci))
            .output(Arc::clone(&files.wave))
            .priority(6)
            .wall_time(Duration::from_secs(7_200))
            .memory_mb(8_000),
    );

    let mut extract = Recipe::new("apero_extract", name, extract)
        .describe("Extract science frames")
        .arg(ArgSpec::directory())
        .arg(ArgSpec::files("files", vec![Arc::clone(&files.science_pp)]))
        .calibration(CalibRequirement::calib("DARK", sci))
        .calibration(CalibRequirement::calib("BADPIX", None))
        .calibration(CalibRequirement::calib("LOC", sci))
        .calibration(CalibRequirement::calib("FLAT", sci))
        .calibration(CalibRequirement::calib("BLAZE", sci))
        .calibration(CalibRequirement::calib("WAVE", sci))
        .grouping(Grouping::PerFile)
        .priority(7)
        .wall_time(Duration::from_secs(1_800));
    for spec in &files.e2ds {
        extract = extract.output(Arc::clone(spec));
    }
    registry.register(extract.output(Arc::clone(&files.s1d)));

    registry.register(
        Recipe::new("apero_mk_tellu", name, make_telluric)
            .describe("Telluric transmission from hot stars")
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("files", vec![Arc::clone(files.science_e2ds())]))
            .calibration(CalibRequirement::calib("WAVE", sci))
            .output(Arc::clone(&files.tellu_trans))
            .grouping(Grouping::PerObject)
            .priority(8),
    );

    registry.register(
        Recipe::new("apero_fit_tellu", name, fit_telluric)
            .describe("Telluric correction of science spectra")
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("files", vec![Arc::clone(files.science_e2ds())]))
            .calibration(CalibRequirement::calib("WAVE", sci))
            .calibration(CalibRequirement::telluric("TELLU_TRANS", sci, false))
            .output(Arc::clone(&files.tellu_obj))
            .output(Arc::clone(&files.tellu_corr))
            .grouping(Grouping::PerFile)
            .priority(9),
    );
}

/// Byte-wise mean of the inputs' data units, truncated to the shortest.
fn combine(inputs: &[DrsFile]) -> Vec<u8> {
    let Some(len) = inputs.iter().map(|f| f.data.len()).min() else {
        return vec![];
    };
    (0..len)
        .map(|i| {
            let sum: u32 = inputs.iter().map(|f| f.data[i] as u32).sum();
            (sum / inputs.len() as u32) as u8
        })
        .collect()
}

/// Mean level of `data` scaled to [0, 1].
fn level(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|b| *b as f64).sum::<f64>() / data.len() as f64 / 255.0
}

/// Fraction of samples below `threshold` times the mean level.
fn low_fraction(data: &[u8], threshold: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let cut = level(data) * 255.0 * threshold;
    data.iter().filter(|b| (**b as f64) < cut).count() as f64 / data.len() as f64
}

/// Relative scatter of `data` around its mean.
fn relative_rms(data: &[u8]) -> f64 {
    let mean = level(data) * 255.0;
    if mean == 0.0 {
        return 0.0;
    }
    let var = data
        .iter()
        .map(|b| (*b as f64 - mean).powi(2))
        .sum::<f64>()
        / data.len() as f64;
    var.sqrt() / mean
}

/// Number of rising edges through the mean: a stand-in for traced orders.
fn edges(data: &[u8]) -> i64 {
    let mean = level(data) * 255.0;
    data.windows(2)
        .filter(|w| (w[0] as f64) <= mean && (w[1] as f64) > mean)
        .count() as i64
}

fn first(inputs: &[DrsFile], arg: &str) -> Result<DrsFile, RecipeError> {
    inputs
        .first()
        .cloned()
        .ok_or_else(|| RecipeError::exception(format!("argument '{arg}' bound no files")))
}

fn preprocess(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let max_saturation = ctx.params().get_f64("PP_MAX_SATURATION")?;
    for file in ctx.load("files")? {
        ctx.check_cancelled()?;
        let saturated = if file.data.is_empty() {
            0.0
        } else {
            file.data.iter().filter(|b| **b == u8::MAX).count() as f64 / file.data.len() as f64
        };
        ctx.qc().check(
            "SATURATION",
            saturated,
            &format!("SATURATION <= {max_saturation}"),
            saturated <= max_saturation,
        );
        let header = ctx.product_header(&file);
        ctx.write_output("PP", &[&file.bound], header, file.data.clone())?;
    }
    Ok(())
}

fn dark_level_checks(ctx: &mut RecipeContext, data: &[u8]) -> Result<f64, RecipeError> {
    let max_level = ctx.params().get_f64("QC_MAX_DARKLEVEL")?;
    let med = level(data);
    ctx.qc().check(
        "DARK_MED",
        med,
        &format!("DARK_MED <= {max_level}"),
        med <= max_level,
    );
    Ok(med)
}

fn dark_ref(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let inputs = ctx.load("files")?;
    let base = first(&inputs, "files")?;
    let data = combine(&inputs);
    let med = dark_level_checks(ctx, &data)?;

    let mut header = ctx.product_header(&base);
    header.set(ctx.instrument().keywords.card("KW_DARK_MED")?, med, Some("dark level"));
    let bound: Vec<_> = inputs.iter().map(|f| &f.bound).collect();
    ctx.write_output("DARK_REF", &bound, header, data)?;
    Ok(())
}

fn dark(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let inputs = ctx.load("files")?;
    let base = first(&inputs, "files")?;
    let min_exptime = ctx.params().get_f64("QC_DARK_TIME")?;
    let exptime_card = ctx.instrument().keywords.card("KW_EXPTIME")?.to_string();
    if let Some(exptime) = base.header.get_f64(&exptime_card) {
        ctx.qc().check(
            "EXPTIME",
            exptime,
            &format!("EXPTIME >= {min_exptime}"),
            exptime >= min_exptime,
        );
    }

    let data = combine(&inputs);
    let med = dark_level_checks(ctx, &data)?;
    let dead = low_fraction(&data, 0.1) * 100.0;

    let mut header = ctx.product_header(&base);
    let keywords = &ctx.instrument().keywords;
    header.set(keywords.card("KW_DARK_MED")?, med, Some("dark level"));
    header.set(keywords.card("KW_DARK_DEAD")?, dead, Some("dead pixel percent"));
    let bound: Vec<_> = inputs.iter().map(|f| &f.bound).collect();
    ctx.write_output("DARK", &bound, header, data)?;
    Ok(())
}

fn badpix(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let flats = ctx.load("flatfiles")?;
    let darks = ctx.load("darkfiles")?;
    let base = first(&flats, "flatfiles")?;
    let cut = ctx.params().get_f64("BADPIX_FLAT_CUT_RATIO")?;
    let max_frac = ctx.params().get_f64("QC_MAX_BADPIX_FRAC")?;

    let flat = combine(&flats);
    let fraction = low_fraction(&flat, cut);
    ctx.qc().check(
        "BADPIX_FRAC",
        fraction,
        &format!("BADPIX_FRAC <= {max_frac}"),
        fraction <= max_frac,
    );

    let mut header = ctx.product_header(&base);
    header.set(ctx.instrument().keywords.card("KW_BADPFRAC")?, fraction, Some("bad pixel fraction"));
    let threshold = level(&flat) * 255.0 * cut;
    let mask: Vec<u8> = flat.iter().map(|b| u8::from((*b as f64) < threshold)).collect();
    let background = if darks.is_empty() { flat.clone() } else { combine(&darks) };

    let bound: Vec<_> = flats.iter().map(|f| &f.bound).collect();
    ctx.write_output("BADPIX", &bound, header.clone(), mask)?;
    ctx.write_output("BKGRDMAP", &bound, header, background)?;
    Ok(())
}

fn localisation(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let inputs = ctx.load("files")?;
    let base = first(&inputs, "files")?;
    let min_orders = ctx.params().get_i64("QC_LOC_MIN_ORDERS")?;

    let data = combine(&inputs);
    let orders = edges(&data);
    ctx.qc().check(
        "LOC_NBO",
        orders as f64,
        &format!("LOC_NBO >= {min_orders}"),
        orders >= min_orders,
    );

    let mut header = ctx.product_header(&base);
    header.set(ctx.instrument().keywords.card("KW_LOC_NBO")?, orders, Some("orders found"));
    let bound: Vec<_> = inputs.iter().map(|f| &f.bound).collect();
    ctx.write_output("ORDER_PROFILE", &bound, header.clone(), data.clone())?;
    ctx.write_output("LOC", &bound, header, data)?;
    Ok(())
}

fn flat(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let inputs = ctx.load("files")?;
    let base = first(&inputs, "files")?;
    let max_rms = ctx.params().get_f64("QC_FF_MAX_RMS")?;

    let data = combine(&inputs);
    let rms = relative_rms(&data);
    ctx.qc().check("FF_RMS", rms, &format!("FF_RMS <= {max_rms}"), rms <= max_rms);

    let mut header = ctx.product_header(&base);
    header.set(ctx.instrument().keywords.card("KW_FF_RMS")?, rms, Some("flat rms"));
    let bound: Vec<_> = inputs.iter().map(|f| &f.bound).collect();
    ctx.write_output("FLAT", &bound, header.clone(), data.clone())?;
    ctx.write_output("BLAZE", &bound, header, data)?;
    Ok(())
}

fn wave(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let hc = ctx.load("hcfiles")?;
    let fp = ctx.load("fpfiles")?;
    let base = first(&hc, "hcfiles")?;
    let max_rms = ctx.params().get_f64("QC_WAVE_MAX_RMS")?;
    let niter1 = ctx.params().get_i64("WAVE_NIGHT_NITERATIONS1")?;
    let niter2 = ctx.params().get_i64("WAVE_NIGHT_NITERATIONS2")?;

    let data = combine(&hc);
    let widths: Vec<f64> = data.iter().map(|b| *b as f64 / 255.0).collect();
    let ew_min = widths.iter().copied().fold(f64::INFINITY, f64::min);
    let ew_max = widths.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let rms = relative_rms(&data) * 100.0;
    ctx.qc().check("WAVE_RMS", rms, &format!("WAVE_RMS <= {max_rms}"), rms <= max_rms);

    let mut header = ctx.product_header(&base);
    let keywords = &ctx.instrument().keywords;
    if !widths.is_empty() {
        header.set(keywords.card("KW_WAVE_HCG_EW_MIN")?, ew_min, Some("min HC line width"));
        header.set(keywords.card("KW_WAVE_HCG_EW_MAX")?, ew_max, Some("max HC line width"));
    }
    header.set(keywords.card("KW_WNT_NITER1")?, niter1, Some("first pass iterations"));
    header.set(keywords.card("KW_WNT_NITER2")?, niter2, Some("second pass iterations"));
    header.set(keywords.card("KW_WAVE_RMS")?, rms, Some("solution rms"));

    let mut bound: Vec<_> = hc.iter().map(|f| &f.bound).collect();
    bound.extend(fp.iter().map(|f| &f.bound));
    ctx.write_output("WAVE", &bound, header, data)?;
    Ok(())
}

fn snr(data: &[u8]) -> f64 {
    let mean = level(data) * 255.0;
    if mean <= 0.0 {
        0.0
    } else {
        mean.sqrt()
    }
}

fn extract(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let fibers: Vec<String> = ctx
        .recipe()
        .outputs
        .iter()
        .filter(|o| o.name.starts_with("E2DS_"))
        .filter_map(|o| o.fiber.clone())
        .collect();
    let sci = fibers.first().cloned().unwrap_or_default();
    // Every declared calibration must be readable before any product is queued.
    for (key, fiber) in [
        ("DARK", Some(sci.as_str())),
        ("BADPIX", None),
        ("FLAT", Some(sci.as_str())),
        ("WAVE", Some(sci.as_str())),
    ] {
        ctx.load_calibration(key, fiber)?;
    }

    for file in ctx.load("files")? {
        ctx.check_cancelled()?;
        let signal = snr(&file.data);
        ctx.qc().check("EXT_SNR", signal, "EXT_SNR > 0", signal > 0.0);

        let mut header = ctx.product_header(&file);
        header.set(ctx.instrument().keywords.card("KW_EXT_SNR")?, signal, Some("extraction SNR"));
        for fiber in &fibers {
            ctx.write_output(&format!("E2DS_{fiber}"), &[&file.bound], header.clone(), file.data.clone())?;
        }
        ctx.write_output("S1D", &[&file.bound], header, file.data.clone())?;
    }
    Ok(())
}

fn make_telluric(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let inputs = ctx.load("files")?;
    let base = first(&inputs, "files")?;
    let min_snr = ctx.params().get_f64("MKTELLU_QC_SNR_MIN")?;
    let clean_oh = ctx.params().get_bool("TELLUP_CLEAN_OH_LINES")?;

    let data = combine(&inputs);
    let signal = snr(&data);
    ctx.qc().check(
        "TELLU_SNR",
        signal,
        &format!("TELLU_SNR >= {min_snr}"),
        signal >= min_snr,
    );

    let mut header = ctx.product_header(&base);
    let keywords = &ctx.instrument().keywords;
    header.set(keywords.card("KW_TELLU_SNR")?, signal, Some("telluric SNR"));
    header.set(keywords.card("KW_TELLUP_CLEAN_OHLINES")?, clean_oh, Some("OH lines cleaned"));
    let bound: Vec<_> = inputs.iter().map(|f| &f.bound).collect();
    ctx.write_output("TELLU_TRANS", &bound, header, data)?;
    Ok(())
}

fn fit_telluric(ctx: &mut RecipeContext) -> Result<(), RecipeError> {
    let fiber = transmission_fiber(ctx);
    let transmission = ctx.load_calibration("TELLU_TRANS", fiber.as_deref())?;
    let min_snr = ctx.params().get_f64("FTELLU_QC_SNR_MIN")?;

    for file in ctx.load("files")? {
        ctx.check_cancelled()?;
        let corrected: Vec<u8> = file
            .data
            .iter()
            .zip(transmission.data.iter().chain(std::iter::repeat(&u8::MAX)))
            .map(|(s, t)| ((*s as u32 * 255) / (*t as u32).max(1)).min(255) as u8)
            .collect();
        let signal = snr(&corrected);
        ctx.qc().check(
            "TELLU_SNR",
            signal,
            &format!("TELLU_SNR >= {min_snr}"),
            signal >= min_snr,
        );

        let mut header = ctx.product_header(&file);
        header.set(ctx.instrument().keywords.card("KW_TELLU_SNR")?, signal, Some("telluric SNR"));
        ctx.write_output("TELLU_OBJ", &[&file.bound], header.clone(), corrected.clone())?;
        ctx.write_output("TELLU_CORR", &[&file.bound], header, corrected)?;
    }
    Ok(())
}

fn transmission_fiber(ctx: &RecipeContext) -> Option<String> {
    ctx.recipe()
        .calibrations
        .iter()
        .find(|c| c.key == "TELLU_TRANS")
        .and_then(|c| c.fiber.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drs(data: Vec<u8>) -> DrsFile {
        DrsFile {
            bound: crate::files::BoundFile {
                path: "x.fits".into(),
                night: "2021-07-01".into(),
                filename: "x.fits".into(),
                kind: FileKind::Preprocessed,
                dprtype: "DARK_DARK_INT".into(),
                fiber: None,
                object: None,
                mid_obs_time: None,
            },
            header: Default::default(),
            data,
        }
    }

    #[test]
    fn test_catalogue_follows_the_instrument() {
        let spirou = FileCatalogue::new(&Instrument::builtin("SPIROU").unwrap());
        assert_eq!(spirou.science_fiber, "AB");
        assert_eq!(spirou.e2ds.len(), 4);
        assert!(spirou.dark_pp.root().accepts_dprtype("DARK_DARK_TEL"));
        assert!(!spirou.dark_pp.root().dprtypes.contains(&"DARK_DARK".to_string()));

        let nirps = FileCatalogue::new(&Instrument::builtin("NIRPS_HA").unwrap());
        assert_eq!(nirps.science_fiber, "A");
        assert_eq!(nirps.dark_pp.root().dprtypes, vec!["DARK_DARK".to_string()]);
        assert_eq!(
            nirps.science_e2ds().derived_filename("r1"),
            "r1_pp_e2ds_A.fits"
        );
    }

    #[test]
    fn test_statistics() {
        let combined = combine(&[drs(vec![10, 20, 30]), drs(vec![30, 40])]);
        assert_eq!(combined, vec![20, 30]);
        assert_eq!(level(&[]), 0.0);
        assert!((level(&[255, 255]) - 1.0).abs() < 1e-12);
        assert_eq!(relative_rms(&[5, 5, 5]), 0.0);
        assert_eq!(edges(&[0, 10, 0, 10]), 2);
        assert!((low_fraction(&[0, 100, 100, 100], 0.5) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_registry_has_every_builtin() {
        let registry = RecipeRegistry::builtin(&Instrument::builtin("SPIROU").unwrap());
        for name in [
            "apero_preprocess",
            "apero_dark_ref",
            "apero_dark",
            "apero_badpix",
            "apero_loc",
            "apero_flat",
            "apero_wave",
            "apero_extract",
            "apero_mk_tellu",
            "apero_fit_tellu",
        ] {
            assert!(registry.contains(name), "{name}");
        }
        let extract = registry.get("apero_extract").unwrap();
        assert_eq!(extract.outputs.len(), 5);
        assert_eq!(extract.grouping, Grouping::PerFile);
    }
}
