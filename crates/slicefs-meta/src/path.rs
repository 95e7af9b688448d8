//! Reverse path lookup for diagnostics.

use slicefs_types::status_code::MetaCode;
use slicefs_types::{make_error_msg, Result};

use crate::meta::Meta;
use crate::types::{Context, Ino, ROOT_INODE};

/// Absolute path of `ino`, found by walking parent links up to the root.
///
/// For hard-linked files any one of the links may be returned.
pub async fn get_path(meta: &dyn Meta, ctx: &Context, ino: Ino) -> Result<String> {
    let mut names = Vec::new();
    let mut current = ino;
    while current != ROOT_INODE {
        let parent = meta.getattr(ctx, current).await?.parent;
        if parent == 0 {
            return make_error_msg(MetaCode::NOT_FOUND, format!("inode {} has no parent", current));
        }
        let entries = meta.readdir(ctx, parent, false).await?;
        let Some(entry) = entries
            .into_iter()
            .find(|e| e.inode == current && e.name != "." && e.name != "..")
        else {
            return make_error_msg(
                MetaCode::NOT_FOUND,
                format!("no entry for inode {} in {}", current, parent),
            );
        };
        names.push(entry.name);
        current = parent;
    }
    if names.is_empty() {
        return Ok("/".to_string());
    }
    names.reverse();
    Ok(format!("/{}", names.join("/")))
}
