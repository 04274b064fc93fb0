//! Index creation.

use crate::client::Destination;
use crate::config::{RestoreOptions, WriteConcern};
use crate::error::{RestoreError, RestoreResult};
use crate::namespace::{Namespace, INDEX_COLLECTION};
use docrestore_codec::Document;
use tracing::{debug, error};

/// Rewrites an index definition for its destination namespace.
///
/// The `ns` field is replaced: by `<db>.<original collection>` when
/// `preserve_original` is set (the collection is taken from the definition's
/// own `ns`), by `<db>.<coll>` of `target` otherwise. The `v` field is
/// dropped unless `keep_version` is set. Field order is kept, `ns` included.
#[must_use]
pub fn rewrite_definition(
    definition: &Document,
    target: &Namespace,
    preserve_original: bool,
    keep_version: bool,
) -> Document {
    let ns = if preserve_original {
        let original = definition
            .get_str("ns")
            .and_then(|ns| ns.split_once('.'))
            .map_or(target.coll.as_str(), |(_, coll)| coll);
        target.sibling(original)
    } else {
        target.clone()
    };

    let mut rewritten = Document::with_capacity(definition.len() + 1);
    for (key, value) in definition.iter() {
        if key != "v" || keep_version {
            rewritten.insert(key, value.clone());
        }
    }
    // Replaces in place; appended only when the definition had no `ns`.
    rewritten.insert("ns", ns.full());
    rewritten
}

/// Creates one index on the destination.
///
/// The rewritten definition is inserted into `<db>.system.indexes` and the
/// outcome is read back with the configured write concern (plain
/// acknowledgement if none). A "not replicated" outcome with a replicated
/// write concern is logged and ignored.
///
/// # Errors
///
/// Returns [`RestoreError::IndexCreation`] for any other reported failure, or
/// a client error.
pub fn create_index<D: Destination + ?Sized>(
    client: &mut D,
    target: &Namespace,
    definition: &Document,
    preserve_original: bool,
    options: &RestoreOptions,
) -> RestoreResult<()> {
    let rewritten = rewrite_definition(
        definition,
        target,
        preserve_original,
        options.keep_index_version,
    );
    let index_ns = rewritten.get_str("ns").unwrap_or_default().to_string();
    let catalog = target.sibling(INDEX_COLLECTION).full();
    debug!(ns = %index_ns, name = ?rewritten.get_str("name"), "creating index");

    client.insert(&catalog, rewritten)?;

    let write_concern = options.write_concern.unwrap_or_else(WriteConcern::acknowledged);
    let Some(err) = client.get_last_error(&target.db, &write_concern)? else {
        return Ok(());
    };

    if err.is_no_replication() && write_concern.needs_replication() {
        error!(
            ns = %index_ns,
            "cannot create index: a replicated write concern was given to a server that is not replicated"
        );
        return Ok(());
    }

    Err(RestoreError::IndexCreation {
        ns: index_ns,
        code: err.code,
        message: err.message,
    })
}
