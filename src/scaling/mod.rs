//! Target width and output format for a request.
//!
//! Resolution runs in a fixed order: sizing signal (cookie, or the
//! explicit-width fallback), baseline width, direct-scaling override,
//! format conversion, the smaller-than-target short-circuit and finally the
//! configured strategy. Each step may reject, which sends the request on
//! unmodified.

use log::{debug, warn};

use crate::config::{CookieFallback, ScaleBy, Settings};
use crate::error::Rejection;
use crate::request::{DeviceParameters, RequestContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Viewport,
    Breakpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingDecision {
    pub width: u32,
    pub strategy: Strategy,
    /// Extension of the variant, without the dot.
    pub extension: String,
    /// Origin is already no wider than the target; only the format changes.
    pub conversion_only: bool,
}

pub fn resolve(
    ctx: &RequestContext,
    intrinsic_width: u32,
    settings: &Settings,
) -> Result<ScalingDecision, Rejection> {
    let device = sizing_signal(ctx, settings)?;
    debug!(
        "({}) density={}, width={}",
        ctx.file_stem, device.density, device.width
    );

    let mut target = (device.density * device.width).round();
    let mut direct = false;

    if ctx.query_width > 0 {
        if settings.direct_scaling {
            if !settings.direct_scale_sizes.is_empty()
                && !settings.direct_scale_sizes.contains(&ctx.query_width)
            {
                return Err(Rejection::RejectedByPolicy(format!(
                    "image size not listed in direct_scale_sizes: {}",
                    ctx.query_width
                )));
            }
            target = (ctx.query_width as f64 * device.density).round();
            direct = true;
        } else {
            warn!("({}) direct scaling is not enabled", ctx.file_stem);
        }
    }

    if !target.is_finite() || target < 1.0 || target > u32::MAX as f64 {
        return Err(Rejection::RejectedByPolicy(format!(
            "calculated image width is not a legal number: {}",
            target
        )));
    }
    let width = target as u32;
    debug!("({}) new image width is probably {}", ctx.file_stem, width);

    let conversion = conversion_target(ctx, settings);

    if width >= intrinsic_width {
        return match conversion {
            Some(extension) => Ok(ScalingDecision {
                width: intrinsic_width,
                strategy: Strategy::Direct,
                extension,
                conversion_only: true,
            }),
            None => Err(Rejection::OriginTooSmall {
                intrinsic: intrinsic_width,
                requested: width,
            }),
        };
    }

    let (width, strategy) = if direct {
        (width, Strategy::Direct)
    } else {
        match settings.scale_by {
            ScaleBy::Viewport => (width, Strategy::Viewport),
            ScaleBy::Breakpoint => (
                snap_to_breakpoint(width, &settings.breakpoints)?,
                Strategy::Breakpoint,
            ),
        }
    };

    Ok(ScalingDecision {
        width,
        strategy,
        extension: conversion.unwrap_or_else(|| ctx.extension.clone()),
        conversion_only: false,
    })
}

fn sizing_signal(ctx: &RequestContext, settings: &Settings) -> Result<DeviceParameters, Rejection> {
    if let Some(device) = ctx.device {
        return Ok(device);
    }

    if settings.direct_scaling
        && ctx.query_width > 0
        && settings.cookie_fallback == CookieFallback::AssumeDensityOne
    {
        warn!(
            "({}) no sizing cookie but direct scaling is requested, assuming density 1",
            ctx.file_stem
        );
        return Ok(DeviceParameters {
            density: 1.0,
            width: 1.0,
        });
    }

    Err(Rejection::SignalMissing(if ctx.query_width > 0 {
        "no sizing cookie was found and the cookie fallback is disabled".to_string()
    } else {
        "no sizing cookie was found and no width was requested".to_string()
    }))
}

/// Smallest breakpoint not below `width`; `breakpoints` must be ascending.
pub fn snap_to_breakpoint(width: u32, breakpoints: &[u32]) -> Result<u32, Rejection> {
    let highest = breakpoints.last().copied().unwrap_or(0);
    if width > highest {
        return Err(Rejection::RejectedByPolicy(format!(
            "highest breakpoint ({}) is smaller than new image width ({})",
            highest, width
        )));
    }
    breakpoints
        .iter()
        .copied()
        .find(|bp| *bp >= width)
        .ok_or_else(|| {
            Rejection::RejectedByPolicy(format!("no breakpoint found for width {}", width))
        })
}

// Per-request conversion overrides the global one
fn conversion_target(ctx: &RequestContext, settings: &Settings) -> Option<String> {
    let origin = ctx.origin_extension();

    if let Some(requested) = &ctx.query_format {
        if *requested != origin && settings.convertible_file_types.contains(requested) {
            return Some(requested.clone());
        }
    }

    let global = settings.file_type_conversion.as_ref()?;
    if *global == origin {
        return None;
    }
    if global == "webp"
        && !ctx
            .accept
            .as_deref()
            .is_some_and(|accept| accept.contains("image/webp"))
    {
        warn!("({}) filetype \"webp\" is not accepted by client", ctx.file_stem);
        return None;
    }
    Some(global.clone())
}
