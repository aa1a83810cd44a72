use std::sync::Arc;

use ocm_repository::{ComponentVersionAccess, Repository};
use ocm_types::{History, NameVersion};
use tokio_util::sync::CancellationToken;

use crate::{TransferError, TransferHandler, TransferState, KIND_COMPONENT_VERSION};

/// Transfers the component version `src`, found in `repo`, into `target`.
///
/// Resources and sources are handed to `handler`, which decides whether
/// their content is copied. For every component reference the handler
/// decides whether the referenced version is transferred as well; referenced
/// versions are committed before `src` is.
///
/// Nothing is committed for a version whose transfer fails, but versions
/// referenced by it that were already committed stay in `target`.
pub fn transfer_version(
    repo: &Arc<dyn Repository>,
    src: &dyn ComponentVersionAccess,
    target: &dyn Repository,
    handler: &dyn TransferHandler,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    transfer(&History::default(), repo, src, target, handler, cancel)
}

/// Copies the descriptor of `src` into `target` and hands all resources and
/// sources to `handler`. Stops at the first failure.
pub fn copy_version(
    history: &History,
    src: &dyn ComponentVersionAccess,
    target: &mut dyn ComponentVersionAccess,
    handler: &dyn TransferHandler,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let mut progress = Progress::new(src.name_version());
    copy(&mut progress, history, src, target, handler, cancel)
}

/// Tracks and logs the state of one version transfer.
struct Progress {
    name_version: NameVersion,
    state: TransferState,
}

impl Progress {
    fn new(name_version: NameVersion) -> Self {
        Self {
            name_version,
            state: TransferState::Start,
        }
    }

    fn advance(&mut self, next: TransferState) {
        tracing::debug!("{}: {} -> {}", self.name_version, self.state, next);
        self.state = next;
    }
}

fn check_cancelled(cancel: &CancellationToken, history: &History) -> Result<(), TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled {
            history: history.clone(),
        });
    }
    Ok(())
}

fn transfer(
    history: &History,
    repo: &Arc<dyn Repository>,
    src: &dyn ComponentVersionAccess,
    target: &dyn Repository,
    handler: &dyn TransferHandler,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let nv = src.name_version();
    let span = tracing::debug_span!("transfer_version", component = %nv.name, version = %nv.version);
    let _enter = span.enter();

    if history.contains(&nv) {
        return Err(TransferError::Recursion {
            kind: KIND_COMPONENT_VERSION,
            name_version: nv,
            history: history.clone(),
        });
    }
    let history = history.with(nv.clone());

    let mut progress = Progress::new(nv);
    let result = transfer_steps(&mut progress, &history, repo, src, target, handler, cancel);
    progress.advance(match result {
        Ok(()) => TransferState::Committed,
        Err(_) => TransferState::Aborted,
    });
    result
}

fn transfer_steps(
    progress: &mut Progress,
    history: &History,
    repo: &Arc<dyn Repository>,
    src: &dyn ComponentVersionAccess,
    target: &dyn Repository,
    handler: &dyn TransferHandler,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    check_cancelled(cancel, history)?;
    let nv = &progress.name_version;

    let component = target
        .lookup_component(&nv.name)
        .map_err(|source| TransferError::Lookup {
            history: history.clone(),
            source,
        })?;

    // Dropping the new version on any error below discards it.
    let mut version = component
        .new_version(&nv.version)
        .map_err(|source| TransferError::CreateVersion {
            history: history.clone(),
            source,
        })?;

    copy(progress, history, src, version.as_mut(), handler, cancel)?;

    progress.advance(TransferState::TransferReferences);
    for reference in &src.descriptor().component.component_references {
        check_cancelled(cancel, history)?;
        let referenced = reference.target();

        let Some((nested_repo, nested_handler)) =
            handler.transfer_version(repo, &referenced.name, &referenced.version)
        else {
            tracing::debug!("keeping reference {} to {}", reference.name, referenced);
            continue;
        };

        let already_present = target
            .lookup_component(&referenced.name)
            .and_then(|c| c.has_version(&referenced.version))
            .map_err(|source| TransferError::Lookup {
                history: history.clone(),
                source,
            })?;
        if already_present && !history.contains(&referenced) {
            tracing::debug!("{} is already present in the target", referenced);
            continue;
        }

        let nested = nested_repo
            .lookup_component_version(&referenced.name, &referenced.version)
            .map_err(|source| TransferError::NestedComponent {
                history: history.clone(),
                name_version: referenced.clone(),
                source,
            })?;
        transfer(
            history,
            &nested_repo,
            nested.as_ref(),
            target,
            nested_handler.as_ref(),
            cancel,
        )?;
    }

    check_cancelled(cancel, history)?;
    component
        .add_version(version)
        .map_err(|source| TransferError::Commit {
            history: history.clone(),
            source,
        })
}

fn copy(
    progress: &mut Progress,
    history: &History,
    src: &dyn ComponentVersionAccess,
    target: &mut dyn ComponentVersionAccess,
    handler: &dyn TransferHandler,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    progress.advance(TransferState::CopyDescriptor);
    target
        .set_descriptor(src.descriptor().clone())
        .map_err(|source| TransferError::CopyDescriptor {
            history: history.clone(),
            source,
        })?;

    progress.advance(TransferState::TransferResources);
    for resource in src.resources() {
        check_cancelled(cancel, history)?;
        tracing::debug!("transferring resource {}", resource.index());
        handler
            .transfer_resource(&resource, &mut *target)
            .map_err(|source| TransferError::Resource {
                history: history.clone(),
                index: resource.index(),
                source,
            })?;
    }

    progress.advance(TransferState::TransferSources);
    for source_access in src.sources() {
        check_cancelled(cancel, history)?;
        tracing::debug!("transferring source {}", source_access.index());
        handler
            .transfer_source(&source_access, &mut *target)
            .map_err(|source| TransferError::Source {
                history: history.clone(),
                index: source_access.index(),
                source,
            })?;
    }
    Ok(())
}
