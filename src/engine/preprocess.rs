// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Image decoding and preprocessing strategies.
//!
//! Both strategies produce an unbatched `[3, 224, 224]` f32 tensor normalized
//! with the ImageNet mean/std. The accelerated strategy uploads the resized
//! pixels and does the arithmetic on the device; the host strategy mirrors
//! the classic resize / center-crop / to-tensor / normalize pipeline.

use candle_core::{DType, Device, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use super::error::InferenceError;
use super::gpu::GpuBackend;

/// Square input edge expected by the classifier.
pub const INPUT_SIZE: u32 = 224;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decode an encoded image payload.
///
/// Runs before any device work so a bad payload never touches the GPU.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, InferenceError> {
    if bytes.is_empty() {
        return Err(InferenceError::InvalidImage("payload is empty".into()));
    }
    image::load_from_memory(bytes)
        .map_err(|e| InferenceError::InvalidImage(format!("provided file is not a valid image: {}", e)))
}

/// Preprocessing strategy, chosen once per engine.
pub enum Preprocessor {
    Accelerated(AcceleratedPreprocessor),
    Host(HostPreprocessor),
}

impl Preprocessor {
    /// Pick the accelerated strategy only when `device` is an accelerator and
    /// its runtime is compiled into this build.
    pub fn select(device: &Device) -> Result<Self, InferenceError> {
        let backend = GpuBackend::of(device);
        if backend.is_accelerator() && backend.runtime_available() {
            Ok(Self::Accelerated(AcceleratedPreprocessor::new(device.clone(), INPUT_SIZE)?))
        } else {
            Ok(Self::Host(HostPreprocessor::new(INPUT_SIZE)))
        }
    }

    pub fn transform(&self, image: &DynamicImage) -> Result<Tensor, InferenceError> {
        match self {
            Self::Accelerated(p) => p.transform(image),
            Self::Host(p) => p.transform(image),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Accelerated(_) => "accelerated",
            Self::Host(_) => "host",
        }
    }

    /// Whether the strategy leaves queued work on an accelerator.
    pub fn runs_on_accelerator(&self) -> bool {
        matches!(self, Self::Accelerated(_))
    }
}

/// Resize on the host, normalize on the device.
pub struct AcceleratedPreprocessor {
    size: u32,
    device: Device,
    mean: Tensor,
    std: Tensor,
}

impl AcceleratedPreprocessor {
    pub fn new(device: Device, size: u32) -> Result<Self, InferenceError> {
        let mean = Tensor::new(&IMAGENET_MEAN, &device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&IMAGENET_STD, &device)?.reshape((3, 1, 1))?;
        Ok(Self {
            size,
            device,
            mean,
            std,
        })
    }

    pub fn transform(&self, image: &DynamicImage) -> Result<Tensor, InferenceError> {
        let edge = self.size as usize;
        let resized = imageops::resize(&image.to_rgb8(), self.size, self.size, FilterType::CatmullRom);
        let hwc = Tensor::from_vec(resized.into_raw(), (edge, edge, 3), &self.device)?;
        let chw = hwc
            .to_dtype(DType::F32)?
            .permute((2, 0, 1))?
            .affine(1.0 / 255.0, 0.0)?
            .broadcast_sub(&self.mean)?
            .broadcast_div(&self.std)?;
        Ok(chw)
    }
}

/// CPU-only pipeline: shorter side to `size`, center crop, normalize.
pub struct HostPreprocessor {
    size: u32,
}

impl HostPreprocessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn transform(&self, image: &DynamicImage) -> Result<Tensor, InferenceError> {
        let cropped = self.resize_and_crop(&image.to_rgb8())?;
        let edge = self.size as usize;
        let data = normalize_chw(&cropped);
        Ok(Tensor::from_vec(data, (3, edge, edge), &Device::Cpu)?)
    }

    fn resize_and_crop(&self, rgb: &RgbImage) -> Result<RgbImage, InferenceError> {
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(InferenceError::InvalidImage("image has no pixels".into()));
        }

        // Crop the centered square of the shorter side in source
        // coordinates; only that square is ever resized.
        let side = width.min(height);
        let x = (width - side) / 2;
        let y = (height - side) / 2;
        let square = imageops::crop_imm(rgb, x, y, side, side).to_image();

        if side == self.size {
            return Ok(square);
        }
        Ok(imageops::resize(&square, self.size, self.size, FilterType::Triangle))
    }
}

/// Flatten an RGB image into normalized CHW floats.
fn normalize_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let num_pixels = (width * height) as usize;
    let mut normalized = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            normalized[c * num_pixels + i] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let buffer: RgbImage = ImageBuffer::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        let err = decode_image(&[]).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidImage(_)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_image(b"abcd").unwrap_err();
        assert!(matches!(err, InferenceError::InvalidImage(_)));
    }

    #[test]
    fn test_decode_accepts_png() {
        let image = decode_image(&png_bytes(8, 6, [1, 2, 3])).unwrap();
        assert_eq!(image.to_rgb8().dimensions(), (8, 6));
    }

    #[test]
    fn test_select_on_cpu_is_host() {
        let pre = Preprocessor::select(&Device::Cpu).unwrap();
        assert_eq!(pre.name(), "host");
        assert!(!pre.runs_on_accelerator());
    }

    #[test]
    fn test_host_output_shape_for_wide_image() {
        let image = decode_image(&png_bytes(400, 300, [10, 20, 30])).unwrap();
        let tensor = HostPreprocessor::new(INPUT_SIZE).transform(&image).unwrap();
        assert_eq!(tensor.dims(), &[3, 224, 224]);
        assert_eq!(tensor.dtype(), DType::F32);
    }

    #[test]
    fn test_host_output_shape_for_tiny_image() {
        let image = decode_image(&png_bytes(3, 5, [200, 100, 50])).unwrap();
        let tensor = HostPreprocessor::new(INPUT_SIZE).transform(&image).unwrap();
        assert_eq!(tensor.dims(), &[3, 224, 224]);
    }

    #[test]
    fn test_host_handles_extreme_aspect_ratio() {
        // A 1-pixel-wide strip crops to a single pixel before any resize.
        let mut strip: RgbImage = ImageBuffer::from_pixel(1, 3000, Rgb([0, 0, 0]));
        strip.put_pixel(0, 1499, Rgb([255, 255, 255]));
        let tensor = HostPreprocessor::new(INPUT_SIZE)
            .transform(&DynamicImage::ImageRgb8(strip))
            .unwrap();
        assert_eq!(tensor.dims(), &[3, 224, 224]);

        let values = tensor.to_vec3::<f32>().unwrap();
        let white = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((values[0][0][0] - white).abs() < 1e-5);
        assert!((values[0][223][223] - white).abs() < 1e-5);
    }

    #[test]
    fn test_host_crops_center_of_wide_image() {
        // Left and right thirds red, middle third blue: only blue survives.
        let mut image: RgbImage = ImageBuffer::from_pixel(300, 100, Rgb([255, 0, 0]));
        for x in 100..200 {
            for y in 0..100 {
                image.put_pixel(x, y, Rgb([0, 0, 255]));
            }
        }
        let tensor = HostPreprocessor::new(INPUT_SIZE)
            .transform(&DynamicImage::ImageRgb8(image))
            .unwrap();
        let values = tensor.to_vec3::<f32>().unwrap();
        let no_red = (0.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        for &(row, col) in &[(0, 0), (112, 112), (223, 223), (0, 223)] {
            assert!((values[0][row][col] - no_red).abs() < 1e-5);
        }
    }

    #[test]
    fn test_host_normalizes_uniform_gray() {
        let image = decode_image(&png_bytes(224, 224, [128, 128, 128])).unwrap();
        let tensor = HostPreprocessor::new(INPUT_SIZE).transform(&image).unwrap();
        let values = tensor.to_vec3::<f32>().unwrap();
        for c in 0..3 {
            let expected = (128.0 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((values[c][0][0] - expected).abs() < 1e-5);
            assert!((values[c][223][223] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_accelerated_math_matches_host_on_cpu_device() {
        // The device pipeline runs on any Candle device, so the CPU exercises its arithmetic.
        let image = decode_image(&png_bytes(224, 224, [64, 128, 192])).unwrap();
        let accel = AcceleratedPreprocessor::new(Device::Cpu, INPUT_SIZE)
            .unwrap()
            .transform(&image)
            .unwrap();
        let host = HostPreprocessor::new(INPUT_SIZE).transform(&image).unwrap();
        assert_eq!(accel.dims(), host.dims());
        let diff = (accel - host)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-4, "max diff {}", diff);
    }
}
