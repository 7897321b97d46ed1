//! Product image pipeline: validate, resize, re-encode, upload, record.
//!
//! The upload and the metadata insert are two separate writes. If the insert
//! fails the uploaded object is removed again so storage holds no orphans.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use meridian_core::{ProductId, ProductImageId};

use super::storage::{ObjectStorage, StorageError};
use crate::db::{ProductRepository, RepositoryError};
use crate::models::{NewProductImage, ProductImage};

/// Largest accepted upload.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Images are scaled down to fit in a square of this size.
pub const MAX_DIMENSION: u32 = 1600;

/// JPEG quality for re-encoded images.
pub const JPEG_QUALITY: u8 = 85;

const ACCEPTED_TYPES: &[(&str, ImageFormat)] = &[
    ("image/jpeg", ImageFormat::Jpeg),
    ("image/png", ImageFormat::Png),
    ("image/webp", ImageFormat::WebP),
    ("image/gif", ImageFormat::Gif),
];

/// Errors from the image pipeline.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Product not found")]
    ProductNotFound,

    #[error("Image not found")]
    ImageNotFound,

    #[error("No image file provided")]
    Empty,

    #[error("Unsupported image type '{0}'; expected JPEG, PNG, WebP or GIF")]
    UnsupportedType(String),

    #[error("Image is {size} bytes; the limit is {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("image encoding failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("image processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// An uploaded file as received from the multipart form.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub alt_text: Option<String>,
    /// Defaults to after the product's existing images.
    pub position: Option<i32>,
}

/// A re-encoded JPEG.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Check the declared type and size of an upload.
///
/// # Errors
///
/// `Empty`, `UnsupportedType` or `TooLarge`.
pub fn validate_upload(bytes: &[u8], content_type: &str) -> Result<ImageFormat, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let format = ACCEPTED_TYPES
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, format)| *format)
        .ok_or_else(|| MediaError::UnsupportedType(content_type.to_string()))?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(MediaError::TooLarge {
            size: bytes.len(),
            max: MAX_IMAGE_BYTES,
        });
    }
    Ok(format)
}

/// Decode, fit within [`MAX_DIMENSION`], and re-encode as JPEG.
///
/// CPU-bound; call through [`process_image`] from async code.
///
/// # Errors
///
/// `Decode` if the bytes are not a valid image of `format`, `Encode` if JPEG
/// encoding fails.
pub fn process_image_blocking(
    bytes: &[u8],
    format: ImageFormat,
) -> Result<ProcessedImage, MediaError> {
    let mut image = image::load_from_memory_with_format(bytes, format).map_err(MediaError::Decode)?;

    if image.width() > MAX_DIMENSION || image.height() > MAX_DIMENSION {
        image = image.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3);
    }

    // JPEG has no alpha channel.
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(MediaError::Encode)?;

    Ok(ProcessedImage {
        bytes: out.into_inner(),
        width,
        height,
    })
}

/// [`process_image_blocking`] on the blocking thread pool.
///
/// # Errors
///
/// See [`process_image_blocking`]; also `Task` if the worker panicked.
pub async fn process_image(bytes: Vec<u8>, format: ImageFormat) -> Result<ProcessedImage, MediaError> {
    tokio::task::spawn_blocking(move || process_image_blocking(&bytes, format)).await?
}

/// Product image uploads and deletions.
#[derive(Clone)]
pub struct MediaService {
    products: Arc<dyn ProductRepository>,
    storage: Arc<dyn ObjectStorage>,
}

impl MediaService {
    #[must_use]
    pub fn new(products: Arc<dyn ProductRepository>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { products, storage }
    }

    /// Process and store an image for a product.
    ///
    /// # Errors
    ///
    /// Returns `ProductNotFound`, a validation error, a processing error, or
    /// the storage/repository error. When the metadata insert fails, the
    /// uploaded object has already been removed.
    #[instrument(skip(self, upload), fields(product_id = %product_id, size = upload.bytes.len()))]
    pub async fn upload_product_image(
        &self,
        product_id: ProductId,
        upload: ImageUpload,
    ) -> Result<ProductImage, MediaError> {
        let product = self
            .products
            .get(product_id)
            .await?
            .ok_or(MediaError::ProductNotFound)?;

        let format = validate_upload(&upload.bytes, &upload.content_type)?;
        let processed = process_image(upload.bytes, format).await?;

        let path = format!("products/{product_id}/{}.jpg", Uuid::new_v4());
        self.storage
            .upload(&path, processed.bytes, "image/jpeg")
            .await?;

        let position = upload
            .position
            .unwrap_or_else(|| i32::try_from(product.images.len()).unwrap_or(i32::MAX));
        let record = NewProductImage {
            product_id,
            url: self.storage.public_url(&path),
            storage_path: path.clone(),
            alt_text: upload.alt_text.filter(|alt| !alt.trim().is_empty()),
            position,
            width: i32::try_from(processed.width).unwrap_or(i32::MAX),
            height: i32::try_from(processed.height).unwrap_or(i32::MAX),
        };

        match self.products.add_image(&record).await {
            Ok(image) => {
                tracing::info!(image_id = %image.id, path = %path, "Stored product image");
                Ok(image)
            }
            Err(e) => {
                tracing::error!(error = %e, path = %path, "Image metadata insert failed; removing upload");
                if let Err(remove_err) = self.storage.remove(&path).await {
                    tracing::error!(error = %remove_err, path = %path, "Failed to remove orphaned image");
                }
                Err(e.into())
            }
        }
    }

    /// Delete an image row, then its stored object.
    ///
    /// # Errors
    ///
    /// Returns `ImageNotFound` if the image does not belong to the product, or
    /// the repository error. A failed object removal is logged, not returned:
    /// the row is already gone.
    #[instrument(skip(self))]
    pub async fn delete_product_image(
        &self,
        product_id: ProductId,
        image_id: ProductImageId,
    ) -> Result<ProductImage, MediaError> {
        let image = self
            .products
            .delete_image(product_id, image_id)
            .await?
            .ok_or(MediaError::ImageNotFound)?;

        if let Err(e) = self.storage.remove(&image.storage_path).await {
            tracing::warn!(error = %e, path = %image.storage_path, "Failed to remove image object");
        }
        Ok(image)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::memory::{FailPoint, InMemoryDatabase};
    use crate::models::ProductInput;
    use crate::services::storage::MemoryObjectStorage;
    use meridian_core::CurrencyCode;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = image::DynamicImage::ImageRgba8(image::RgbaImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    async fn setup() -> (InMemoryDatabase, MemoryObjectStorage, MediaService, ProductId) {
        let db = InMemoryDatabase::new();
        let storage = MemoryObjectStorage::new();
        let service = MediaService::new(Arc::new(db.clone()), Arc::new(storage.clone()));
        let product = ProductRepository::create(
            &db,
            &ProductInput {
                name: "Canvas Tote".to_string(),
                slug: "canvas-tote".to_string(),
                description: None,
                price: Decimal::new(2400, 2),
                currency: None,
                inventory_quantity: 5,
                active: true,
            },
            CurrencyCode::USD,
        )
        .await
        .unwrap();
        (db, storage, service, product.id)
    }

    fn upload(bytes: Vec<u8>, content_type: &str) -> ImageUpload {
        ImageUpload {
            bytes,
            content_type: content_type.to_string(),
            alt_text: Some("Front".to_string()),
            position: None,
        }
    }

    #[test]
    fn test_validate_upload() {
        assert!(matches!(validate_upload(&[], "image/png"), Err(MediaError::Empty)));
        assert!(matches!(
            validate_upload(&[1], "application/pdf"),
            Err(MediaError::UnsupportedType(_))
        ));
        assert_eq!(
            validate_upload(&[1], "image/JPEG; charset=binary").unwrap(),
            ImageFormat::Jpeg
        );
        let big = vec![0_u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(
            validate_upload(&big, "image/png"),
            Err(MediaError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_process_scales_down_preserving_aspect() {
        let processed = process_image_blocking(&png(3200, 1600), ImageFormat::Png).unwrap();
        assert_eq!((processed.width, processed.height), (1600, 800));
        assert_eq!(
            image::guess_format(&processed.bytes).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_process_keeps_small_images() {
        let processed = process_image_blocking(&png(40, 30), ImageFormat::Png).unwrap();
        assert_eq!((processed.width, processed.height), (40, 30));
    }

    #[test]
    fn test_process_rejects_garbage() {
        assert!(matches!(
            process_image_blocking(b"not an image", ImageFormat::Png),
            Err(MediaError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_stores_object_and_row() {
        let (db, storage, service, product_id) = setup().await;

        let image = service
            .upload_product_image(product_id, upload(png(10, 10), "image/png"))
            .await
            .unwrap();

        assert!(image.storage_path.starts_with(&format!("products/{product_id}/")));
        assert!(image.storage_path.ends_with(".jpg"));
        assert_eq!(storage.paths(), vec![image.storage_path.clone()]);
        assert_eq!(storage.get(&image.storage_path).unwrap().1, "image/jpeg");
        assert_eq!(db.images().len(), 1);
        assert_eq!(image.position, 0);
    }

    #[tokio::test]
    async fn test_failed_insert_removes_uploaded_object() {
        let (db, storage, service, product_id) = setup().await;
        db.fail_once(FailPoint::ImageInsert);

        let err = service
            .upload_product_image(product_id, upload(png(10, 10), "image/png"))
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Repository(_)));
        assert!(storage.paths().is_empty());
        assert!(db.images().is_empty());
    }

    #[tokio::test]
    async fn test_upload_for_missing_product() {
        let (_db, storage, service, _) = setup().await;
        let err = service
            .upload_product_image(ProductId::new(), upload(png(10, 10), "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ProductNotFound));
        assert!(storage.paths().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_row_then_object() {
        let (db, storage, service, product_id) = setup().await;
        let image = service
            .upload_product_image(product_id, upload(png(10, 10), "image/png"))
            .await
            .unwrap();

        assert!(matches!(
            service.delete_product_image(ProductId::new(), image.id).await,
            Err(MediaError::ImageNotFound)
        ));

        service.delete_product_image(product_id, image.id).await.unwrap();
        assert!(db.images().is_empty());
        assert!(storage.paths().is_empty());
    }
}
