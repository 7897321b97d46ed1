//! Product management and product image uploads.

use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use tracing::instrument;

use meridian_core::{ProductId, ProductImageId};

use crate::error::{AppError, Result};
use crate::extract::ValidatedJson;
use crate::middleware::RequireAdmin;
use crate::models::{Product, ProductImage, ProductInput};
use crate::services::media::ImageUpload;
use crate::state::AppState;

fn not_found(id: ProductId) -> AppError {
    AppError::NotFound(format!("Product {id} not found"))
}

/// Every product, including inactive ones.
#[instrument(skip(state, _admin))]
pub async fn list(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<Product>>> {
    Ok(Json(state.catalog().all_products().await?))
}

#[instrument(skip(state, admin, input), fields(admin = %admin.email, slug = %input.slug))]
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ValidatedJson(input): ValidatedJson<ProductInput>,
) -> Result<(StatusCode, Json<Product>)> {
    let product = state.catalog().create_product(&input).await?;
    tracing::info!(product_id = %product.id, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

#[instrument(skip(state, _admin))]
pub async fn show(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<ProductId>,
) -> Result<Json<Product>> {
    state
        .catalog()
        .product(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

#[instrument(skip(state, admin, input), fields(admin = %admin.email))]
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<ProductId>,
    ValidatedJson(input): ValidatedJson<ProductInput>,
) -> Result<Json<Product>> {
    state
        .catalog()
        .update_product(id, &input)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

#[instrument(skip(state, admin), fields(admin = %admin.email))]
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<ProductId>,
) -> Result<StatusCode> {
    if state.catalog().delete_product(id).await? {
        tracing::info!(product_id = %id, "Product deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}

fn multipart_error(err: &MultipartError) -> AppError {
    AppError::BadRequest(err.body_text())
}

/// Read the `image`, `alt_text` and `position` fields of an upload form.
async fn read_upload(mut multipart: Multipart) -> Result<ImageUpload> {
    let mut image: Option<(Vec<u8>, String)> = None;
    let mut alt_text = None;
    let mut position = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e))?
    {
        match field.name() {
            Some("image") => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| multipart_error(&e))?;
                image = Some((bytes.to_vec(), content_type));
            }
            Some("alt_text") => {
                alt_text = Some(field.text().await.map_err(|e| multipart_error(&e))?);
            }
            Some("position") => {
                let text = field.text().await.map_err(|e| multipart_error(&e))?;
                let value = text.trim().parse::<i32>().ok().filter(|p| *p >= 0);
                position = Some(value.ok_or_else(|| {
                    AppError::BadRequest(format!("Invalid position '{text}'"))
                })?);
            }
            _ => {}
        }
    }

    let (bytes, content_type) =
        image.ok_or_else(|| AppError::BadRequest("Missing field 'image'".to_string()))?;
    Ok(ImageUpload {
        bytes,
        content_type,
        alt_text,
        position,
    })
}

/// Upload, resize and attach an image to a product.
#[instrument(skip(state, admin, multipart), fields(admin = %admin.email))]
pub async fn upload_image(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<ProductId>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ProductImage>)> {
    let multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let upload = read_upload(multipart).await?;
    let image = state.media().upload_product_image(id, upload).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

#[instrument(skip(state, admin), fields(admin = %admin.email))]
pub async fn delete_image(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path((id, image_id)): Path<(ProductId, ProductImageId)>,
) -> Result<StatusCode> {
    state.media().delete_product_image(id, image_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
