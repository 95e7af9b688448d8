use slicefs_kv::ReadOnlyTransaction;
use slicefs_types::status_code::MetaCode;
use slicefs_types::{make_error, Result};

use crate::dir_entry::DirEntryList;
use crate::inode::Inode;
use crate::ops::{check_perm, OpEnv};
use crate::types::{align4k, AccessMask, Context, Entry, Ino, Summary, ROOT_INODE};

pub async fn readdir<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    env: &OpEnv<'_>,
    ctx: &Context,
    ino: Ino,
    plus: bool,
) -> Result<Vec<Entry>> {
    let dir = Inode::load_existing(txn, ino).await?;
    if !dir.attr.is_dir() {
        return make_error(MetaCode::NOT_DIRECTORY);
    }
    let mask = if plus {
        AccessMask::READ | AccessMask::EXEC
    } else {
        AccessMask::READ
    };
    check_perm(env, ctx, &dir.attr, mask)?;

    let parent = if ino == ROOT_INODE || dir.attr.parent == 0 {
        ROOT_INODE
    } else {
        dir.attr.parent
    };
    let children = DirEntryList::load(txn, ino, true).await?;
    let mut out = Vec::with_capacity(children.len() + 2);
    out.push(Entry {
        inode: ino,
        name: ".".to_string(),
        attr: plus.then(|| dir.attr.clone()),
    });
    let parent_attr = if plus {
        Inode::snapshot_load(txn, parent).await?.map(|i| i.attr)
    } else {
        None
    };
    out.push(Entry {
        inode: parent,
        name: "..".to_string(),
        attr: parent_attr,
    });
    for child in children {
        let attr = if plus {
            match Inode::snapshot_load(txn, child.inode).await? {
                Some(inode) => Some(inode.attr),
                None => {
                    tracing::warn!(parent = ino, name = %child.name, inode = child.inode, "readdir: dangling entry");
                    continue;
                }
            }
        } else {
            None
        };
        out.push(Entry {
            inode: child.inode,
            name: child.name,
            attr,
        });
    }
    Ok(out)
}

/// Totals of the subtree rooted at `ino`. Hard links are counted per name.
pub async fn summary<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Summary> {
    let root = Inode::load_existing(txn, ino).await?;
    let mut sum = Summary::default();
    let mut stack = vec![root];
    while let Some(inode) = stack.pop() {
        if inode.attr.is_dir() {
            sum.dirs += 1;
            sum.size += 4096;
            for child in DirEntryList::load(txn, inode.ino, true).await? {
                if let Some(c) = Inode::snapshot_load(txn, child.inode).await? {
                    stack.push(c);
                }
            }
        } else {
            sum.files += 1;
            sum.length += inode.attr.length;
            sum.size += align4k(inode.attr.length);
        }
    }
    Ok(sum)
}
