//! Identity resolution and assignment.
//!
//! Every collection has exactly one identity field. Which field that is gets decided once,
//! when the model is registered ([`resolve_identity`]); afterwards every insert and save
//! runs [`assign_identity`] on the outgoing document, generating a UUID when the field is
//! still empty.

use bson::Bson;
use uuid::Uuid;

use crate::{
    document::{DocumentExt, Model, ModelDescriptor, RawDocument},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Determines the identity field of a model.
///
/// A declared identity wins; otherwise the first annotated field is used.
///
/// # Errors
///
/// Returns [`DocumentStoreError::NoIdentityField`] when the model names neither.
pub fn resolve_identity(descriptor: &ModelDescriptor) -> DocumentStoreResult<String> {
    descriptor
        .declared_id
        .or_else(|| descriptor.annotated_ids.first().copied())
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DocumentStoreError::NoIdentityField(descriptor.name.to_string()))
}

/// Ensures `document` carries an identity value in `field` and returns it.
///
/// Missing, `null` and empty-string values are replaced with a fresh v4 UUID. Running it
/// again on an identified document is a no-op.
///
/// # Errors
///
/// Returns [`DocumentStoreError::IdentityAccess`] when the field holds something other
/// than a string. The operation is failed rather than continuing without an identity.
pub fn assign_identity(document: &mut RawDocument, field: &str) -> DocumentStoreResult<String> {
    match document.get(field) {
        Some(Bson::String(value)) if !value.is_empty() => return Ok(value.clone()),
        None | Some(Bson::Null) | Some(Bson::Undefined) | Some(Bson::String(_)) => {}
        Some(other) => {
            return Err(DocumentStoreError::IdentityAccess(
                field.to_string(),
                format!("expected a string, found {:?}", other.element_type()),
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    document.insert(field, id.clone());

    Ok(id)
}

/// Reads the identity value of a document without assigning one.
pub fn identity_of(document: &RawDocument, field: &str) -> Option<String> {
    match document.get(field) {
        Some(Bson::String(value)) if !value.is_empty() => Some(value.clone()),
        _ => None,
    }
}

/// Serializes a model, assigns its identity and writes the result back into the model.
///
/// Returns the stored document and the identity value.
pub(crate) fn identify<D: Model>(
    model: &mut D,
    field: &str,
) -> DocumentStoreResult<(String, RawDocument)> {
    let mut document = model.to_document()?;
    let had_identity = identity_of(&document, field).is_some();
    let id = assign_identity(&mut document, field)?;

    if !had_identity {
        // The generated id has to come back out through the model, otherwise the caller
        // would hold a value that no longer matches what is stored.
        *model = D::from_document(document.clone())?;
        document = model.to_document()?;

        if identity_of(&document, field).as_deref() != Some(id.as_str()) {
            return Err(DocumentStoreError::IdentityAccess(
                field.to_string(),
                format!("model {} does not keep the assigned identity", D::collection_name()),
            ));
        }
    }

    Ok((id, document))
}
