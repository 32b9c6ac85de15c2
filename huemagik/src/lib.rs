//! Extract a palette of dominant colors from an image by performing
//! k-means clustering in RGB space.
//!
//! # Examples
//!
//! ## Extract 5 dominant colors from an image file.
//!
//! ```no_run
//! let bytes = std::fs::read("some image").unwrap();
//! let palette = huemagik::extract_palette(&bytes, &huemagik::PaletteParams::default()).unwrap();
//! ```
//!
//! ## Extract a reproducible 8 color palette from raw pixels.
//!
//! ```no_run
//! let pixels = image::open("some image").unwrap().into_rgb8();
//! let srgb = palette::cast::from_component_slice(pixels.as_raw());
//!
//! let params = huemagik::PaletteParams {
//!     colors: 8,
//!     seed: Some(42),
//!     ..huemagik::PaletteParams::default()
//! };
//! let palette = huemagik::palette_from_pixels(srgb, &params).unwrap();
//! ```
//!
//! # Arguments
//!
//! ## Colors
//!
//! The number of colors to extract, i.e. the `k` in k-means.
//! Extraction fails if this is `0` or exceeds the number of pixel samples.
//! If it exceeds the number of *distinct* colors in the image,
//! the remaining palette entries repeat existing colors,
//! so the palette always has exactly `colors` entries on success.
//!
//! ## Trials
//!
//! The number of times to run k-means, taking the trial with the lowest variance.
//! k-means can get stuck in a local minimum, so more trials increase the chance
//! of a more optimal palette at the cost of running time. A value of `0` is
//! treated as `1`.
//!
//! ## Convergence Threshold
//!
//! Iteration stops once the total movement of the centroids falls below this
//! threshold. Distances are measured in the unit RGB cube, so `0.001` roughly
//! corresponds to centroids settling within a quarter of an 8-bit step.
//!
//! ## Max Iterations
//!
//! The cap on iterations per trial, in case convergence is slow to arrive.
//!
//! ## Seed
//!
//! `None` draws fresh entropy for every call, so two extractions of the same
//! image may return different (but equally valid) palettes. Provide `Some`
//! seed for bit-exact reproducible output.

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::cargo)]
#![warn(clippy::use_debug, clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![warn(clippy::unwrap_used, clippy::unwrap_in_result)]
#![warn(clippy::unneeded_field_pattern, clippy::rest_pat_in_fully_bound_structs)]
#![warn(clippy::unnecessary_self_imports)]
#![warn(clippy::str_to_string, clippy::string_to_string, clippy::string_slice)]
#![warn(missing_docs, clippy::missing_docs_in_private_items, rustdoc::all)]
#![allow(clippy::module_name_repetitions)]

use image::imageops::FilterType;
use palette::{cast, Srgb};
use std::collections::HashMap;
use thiserror::Error;

mod kmeans;

/// The fixed working resolution images are resized to before clustering.
///
/// Bounds the clustering cost independent of the input image size.
pub const WORKING_SIZE: u32 = 150;

/// Parameters for palette extraction.
///
/// See the crate documentation for an explanation of each field.
#[derive(Debug, Clone)]
pub struct PaletteParams {
    /// The number of colors to extract
    pub colors: u16,
    /// The number of k-means trials to run, keeping the lowest variance result
    pub trials: u32,
    /// The centroid movement threshold used to detect convergence
    pub convergence: f32,
    /// The maximum number of iterations per trial
    pub max_iter: u32,
    /// The seed for centroid initialization, or `None` for fresh entropy
    pub seed: Option<u64>,
}

impl Default for PaletteParams {
    fn default() -> Self {
        Self {
            colors: 5,
            trials: 1,
            convergence: 0.001,
            max_iter: 128,
            seed: None,
        }
    }
}

/// A palette of dominant colors extracted from an image.
#[derive(Debug, Clone)]
pub struct Palette {
    /// The extracted colors, exactly `colors` of them, in cluster output order
    pub colors: Vec<Srgb<u8>>,
    /// The number of pixels assigned to each color
    pub counts: Vec<u32>,
    /// Variance achieved by the clustering, lower indicating higher accuracy
    pub variance: f64,
}

/// Error cases for clustering pixel samples into a palette.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusteringError {
    /// The requested number of colors was zero
    #[error("the number of colors to extract must be at least 1")]
    ZeroColors,
    /// More colors were requested than pixel samples are available
    #[error("requested {requested} colors but only {samples} pixel samples are available")]
    NotEnoughSamples {
        /// The requested number of colors
        requested: u16,
        /// The number of available pixel samples
        samples: usize,
    },
}

/// Error cases for extracting a palette from encoded image bytes.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The bytes were not a recognizable image
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    /// The clustering step rejected its input
    #[error(transparent)]
    Clustering(#[from] ClusteringError),
}

/// Deduplicated `Srgb<f32>` colors converted from `Srgb<u8>` pixels
#[derive(Debug, Clone)]
pub(crate) struct ColorCounts {
    /// The distinct colors
    pub(crate) colors: Vec<Srgb<f32>>,
    /// The number of duplicate pixels for each color
    pub(crate) counts: Vec<u32>,
}

impl ColorCounts {
    /// Deduplicate a slice of `Srgb<u8>` pixels into distinct colors with counts.
    ///
    /// Identical pixels are merged up front and centroid math weights each
    /// color by its count, which gives the same result as clustering the raw
    /// pixel list while doing far less work per iteration.
    fn from_srgb(pixels: &[Srgb<u8>]) -> Self {
        let mut colors = Vec::new();
        let mut counts = Vec::new();

        // Packed Srgb -> index into colors/counts
        let mut memo: HashMap<u32, u32> = HashMap::new();

        for srgb in pixels {
            let key = srgb.into_u32::<palette::rgb::channels::Rgba>();
            let index = *memo.entry(key).or_insert_with(|| {
                // colors.len() < u32::MAX because there are only (2^8)^3 possible sRGB colors
                #[allow(clippy::cast_possible_truncation)]
                let index = colors.len() as u32;

                colors.push(srgb.into_format());
                counts.push(0);
                index
            });

            counts[index as usize] += 1;
        }

        Self { colors, counts }
    }

    /// The number of distinct colors
    pub(crate) fn num_colors(&self) -> u32 {
        // Bounded by the number of possible sRGB colors
        #[allow(clippy::cast_possible_truncation)]
        {
            self.colors.len() as u32
        }
    }

    /// Iterator over each distinct color and its pixel count
    pub(crate) fn pairs(&self) -> impl Iterator<Item = (Srgb<f32>, u32)> + '_ {
        self.colors.iter().copied().zip(self.counts.iter().copied())
    }
}

/// Extracts a palette of `params.colors` dominant colors from encoded image bytes.
///
/// The image is decoded, resized to [`WORKING_SIZE`]`x`[`WORKING_SIZE`]
/// (discarding aspect ratio), flattened to RGB pixel samples,
/// and clustered with k-means.
///
/// # Errors
///
/// Returns [`ExtractionError::Decode`] if the bytes are not a recognizable image
/// and [`ExtractionError::Clustering`] if `params.colors` is invalid for the
/// resulting samples.
pub fn extract_palette(image_bytes: &[u8], params: &PaletteParams) -> Result<Palette, ExtractionError> {
    let image = image::load_from_memory(image_bytes)?
        .resize_exact(WORKING_SIZE, WORKING_SIZE, FilterType::Triangle)
        .into_rgb8();

    let pixels = cast::from_component_slice(image.as_raw());
    let palette = palette_from_pixels(pixels, params)?;
    Ok(palette)
}

/// Clusters a slice of pixel samples into a palette of `params.colors` colors.
///
/// This is the pixel-level entry point underneath [`extract_palette`];
/// use it to skip the decode and resize steps.
///
/// # Errors
///
/// Returns [`ClusteringError::ZeroColors`] if `params.colors` is `0` and
/// [`ClusteringError::NotEnoughSamples`] if it exceeds `pixels.len()`.
pub fn palette_from_pixels(pixels: &[Srgb<u8>], params: &PaletteParams) -> Result<Palette, ClusteringError> {
    if params.colors == 0 {
        return Err(ClusteringError::ZeroColors);
    }

    if usize::from(params.colors) > pixels.len() {
        return Err(ClusteringError::NotEnoughSamples {
            requested: params.colors,
            samples: pixels.len(),
        });
    }

    let color_counts = ColorCounts::from_srgb(pixels);
    let result = kmeans::run(&color_counts, params);

    debug_assert_eq!(result.centroids.len(), usize::from(params.colors));

    Ok(Palette {
        colors: result.centroids.iter().map(|&color| color.into_format()).collect(),
        counts: result.counts,
        variance: result.variance,
    })
}
