//! Pooled Resource Cache
//!
//! Hands out GPU resources keyed by `(descriptor, usage class)` and reclaims
//! idle transient ones across frames.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ResourceCache                        │
//! │                                                          │
//! │  entries: SlotMap<ResourceKey, PooledResource>           │
//! │  pools:   HashMap<PoolKey, Vec<ResourceKey>>             │
//! │  shared:  HashMap<String, ResourceKey>  (refcounted)     │
//! │                                                          │
//! │  begin_frame()  clear checkout / used marks              │
//! │  acquire()      first idle match, or create              │
//! │  release()      early return, allows aliasing            │
//! │  end_frame()    age + destroy idle transients            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Checkout rules
//!
//! An entry is *checked out* from the moment it is acquired until the next
//! `begin_frame` (or an explicit [`release`](ResourceCache::release)). A
//! checked-out entry is never handed out again, so two acquisitions of an
//! equal descriptor within one frame always receive two distinct resources.
//!
//! # Reclaim policy
//!
//! Retained entries are never destroyed by `end_frame`. A transient entry
//! that went unrequested for a whole frame has its idle counter incremented
//! and is destroyed once the counter reaches
//! [`FrameSettings::idle_frame_threshold`](crate::FrameSettings). An entry is
//! never destroyed at the end of the frame that created it.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use super::descriptor::{
    GpuResource, PassDesc, PassTarget, ResourceDescriptor, ResourceKind, UsageClass,
};
use crate::backend::{
    BackendError, BufferDesc, BufferHandle, FramebufferDesc, FramebufferHandle, GpuBackend,
    TextureDesc, TextureHandle,
};
use crate::errors::{FrameError, Result};
use crate::utils::FrameGuard;

new_key_type! {
    /// Stable key of one pooled entry.
    pub struct ResourceKey;
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    descriptor: ResourceDescriptor,
    usage: UsageClass,
}

struct PooledResource {
    resource: GpuResource,
    descriptor: ResourceDescriptor,
    usage: UsageClass,
    created_frame: u64,
    last_used_frame: u64,
    idle_frames: u32,
    /// Exclusively owned by a caller until `begin_frame` or `release`.
    checked_out: bool,
    /// Requested at least once this frame.
    used: bool,
    /// Holders of a shared registry entry; `0` for pooled entries.
    ref_count: u32,
}

/// An acquired resource and the key it is pooled under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub key: ResourceKey,
    pub resource: GpuResource,
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    /// Entries currently holding backend resources.
    pub live: usize,
    /// Entries checked out this frame.
    pub in_use: usize,
    /// Entries created since the cache was built.
    pub created: u64,
    /// Entries destroyed since the cache was built.
    pub destroyed: u64,
    /// Acquisitions answered by an existing entry.
    pub reused: u64,
}

/// Pooled allocator for GPU resources.
pub struct ResourceCache {
    entries: SlotMap<ResourceKey, PooledResource>,
    pools: FxHashMap<PoolKey, Vec<ResourceKey>>,
    by_resource: FxHashMap<GpuResource, ResourceKey>,
    shared: FxHashMap<String, ResourceKey>,
    idle_frame_threshold: u32,
    frame: u64,
    guard: FrameGuard,
    stats: ResourceStats,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ResourceCache {
    #[must_use]
    pub fn new(idle_frame_threshold: u32) -> Self {
        Self {
            entries: SlotMap::with_key(),
            pools: FxHashMap::default(),
            by_resource: FxHashMap::default(),
            shared: FxHashMap::default(),
            idle_frame_threshold: idle_frame_threshold.max(1),
            frame: 0,
            guard: FrameGuard::new("ResourceCache"),
            stats: ResourceStats::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    // ========================================================================
    // Frame boundary
    // ========================================================================

    /// Starts a frame: every checkout and "used" mark is cleared.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.guard.begin()?;
        self.frame += 1;
        for entry in self.entries.values_mut() {
            entry.checked_out = false;
            entry.used = false;
        }
        Ok(())
    }

    /// Ends a frame and reclaims idle transient entries.
    ///
    /// Returns the number of entries destroyed.
    pub fn end_frame(&mut self, backend: &mut dyn GpuBackend) -> Result<usize> {
        self.guard.end()?;

        let frame = self.frame;
        let threshold = self.idle_frame_threshold;
        let mut doomed = Vec::new();

        for (key, entry) in &mut self.entries {
            if entry.usage == UsageClass::Retained || entry.ref_count > 0 {
                continue;
            }
            if entry.used {
                entry.idle_frames = 0;
                continue;
            }
            if entry.created_frame == frame {
                continue;
            }
            entry.idle_frames += 1;
            if entry.idle_frames >= threshold {
                doomed.push(key);
            }
        }

        for key in &doomed {
            self.destroy_entry(backend, *key);
        }
        if !doomed.is_empty() {
            log::debug!(
                "ResourceCache: reclaimed {} idle transient resources (frame {frame})",
                doomed.len()
            );
        }
        Ok(doomed.len())
    }

    pub(crate) fn lock(&mut self) {
        self.guard.lock();
    }

    pub(crate) fn unlock(&mut self) {
        self.guard.unlock();
    }

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Returns an idle entry matching `descriptor` and `usage`, creating one
    /// when none is free. The entry is checked out for the rest of the frame.
    ///
    /// A failed creation leaves the pool untouched.
    pub fn acquire(
        &mut self,
        backend: &mut dyn GpuBackend,
        descriptor: &ResourceDescriptor,
        usage: UsageClass,
    ) -> Result<Acquired> {
        let pool_key = PoolKey {
            descriptor: descriptor.clone(),
            usage,
        };

        let idle = self.pools.get(&pool_key).and_then(|keys| {
            keys.iter()
                .copied()
                .find(|k| self.entries.get(*k).is_some_and(|e| !e.checked_out))
        });

        if let Some(key) = idle
            && let Some(entry) = self.entries.get_mut(key)
        {
            entry.checked_out = true;
            entry.used = true;
            entry.last_used_frame = self.frame;
            entry.idle_frames = 0;
            self.stats.reused += 1;
            log::trace!("ResourceCache: reuse {descriptor}");
            return Ok(Acquired {
                key,
                resource: entry.resource,
            });
        }

        let resource = create_resource(backend, descriptor)?;
        let key = self.entries.insert(PooledResource {
            resource,
            descriptor: descriptor.clone(),
            usage,
            created_frame: self.frame,
            last_used_frame: self.frame,
            idle_frames: 0,
            checked_out: true,
            used: true,
            ref_count: 0,
        });
        self.pools.entry(pool_key).or_default().push(key);
        self.by_resource.insert(resource, key);
        self.stats.created += 1;
        log::debug!("ResourceCache: created {descriptor} ({usage:?})");

        Ok(Acquired { key, resource })
    }

    pub fn texture2d(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: TextureDesc,
        usage: UsageClass,
    ) -> Result<TextureHandle> {
        let acquired = self.acquire(backend, &ResourceDescriptor::texture_2d(desc), usage)?;
        expect_kind(acquired.resource.as_texture(), "texture2d")
    }

    pub fn texture_cube(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: TextureDesc,
        usage: UsageClass,
    ) -> Result<TextureHandle> {
        let acquired = self.acquire(backend, &ResourceDescriptor::texture_cube(desc), usage)?;
        expect_kind(acquired.resource.as_texture(), "textureCube")
    }

    pub fn framebuffer(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: FramebufferDesc,
        usage: UsageClass,
    ) -> Result<FramebufferHandle> {
        let acquired = self.acquire(backend, &ResourceDescriptor::framebuffer(desc), usage)?;
        expect_kind(acquired.resource.as_framebuffer(), "framebuffer")
    }

    /// Color (+ optional depth) render target with its framebuffer.
    pub fn pass(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: PassDesc,
        usage: UsageClass,
    ) -> Result<PassTarget> {
        let acquired = self.acquire(backend, &ResourceDescriptor::pass(desc), usage)?;
        expect_kind(acquired.resource.as_pass(), "pass")
    }

    pub fn buffer(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: BufferDesc,
        usage: UsageClass,
    ) -> Result<BufferHandle> {
        let acquired = self.acquire(backend, &ResourceDescriptor::buffer(desc), usage)?;
        expect_kind(acquired.resource.as_buffer(), "buffer")
    }

    /// Returns a checked-out resource early so a later acquisition in the
    /// same frame may alias it. The entry still counts as used this frame.
    pub fn release(&mut self, resource: impl Into<GpuResource>) -> Result<()> {
        let resource = resource.into();
        let entry = self
            .by_resource
            .get(&resource)
            .and_then(|key| self.entries.get_mut(*key))
            .ok_or_else(|| FrameError::UnknownHandle(format!("{resource:?}")))?;
        entry.checked_out = false;
        Ok(())
    }

    /// Looks up a live entry.
    #[must_use]
    pub fn get(&self, key: ResourceKey) -> Option<GpuResource> {
        self.entries.get(key).map(|e| e.resource)
    }

    /// Descriptor a live resource was created from.
    #[must_use]
    pub fn descriptor_of(&self, resource: impl Into<GpuResource>) -> Option<&ResourceDescriptor> {
        self.by_resource
            .get(&resource.into())
            .and_then(|key| self.entries.get(*key))
            .map(|e| &e.descriptor)
    }

    /// `true` while the resource is checked out this frame.
    #[must_use]
    pub fn is_checked_out(&self, resource: impl Into<GpuResource>) -> bool {
        self.by_resource
            .get(&resource.into())
            .and_then(|key| self.entries.get(*key))
            .is_some_and(|e| e.checked_out)
    }

    // ========================================================================
    // Shared registry
    // ========================================================================

    /// Acquires the shared resource registered under `name`, creating and
    /// initializing it for the first holder.
    ///
    /// Shared entries never join the pool: plain [`acquire`](Self::acquire)
    /// calls cannot receive them, and `end_frame` never reclaims them while
    /// they have holders.
    pub fn acquire_shared<F>(
        &mut self,
        backend: &mut dyn GpuBackend,
        name: &str,
        descriptor: &ResourceDescriptor,
        init: F,
    ) -> Result<GpuResource>
    where
        F: FnOnce(&mut dyn GpuBackend, GpuResource) -> std::result::Result<(), BackendError>,
    {
        if let Some(entry) = self
            .shared
            .get(name)
            .and_then(|key| self.entries.get_mut(*key))
        {
            if entry.descriptor != *descriptor {
                return Err(FrameError::config(format!(
                    "shared resource '{name}' is registered as {}, requested as {descriptor}",
                    entry.descriptor
                )));
            }
            entry.ref_count += 1;
            return Ok(entry.resource);
        }

        let resource = create_resource(backend, descriptor)?;
        if let Err(e) = init(backend, resource) {
            destroy_resource(backend, resource);
            return Err(FrameError::ResourceExhausted {
                descriptor: descriptor.to_string(),
                message: format!("initializing shared resource '{name}': {e}"),
            });
        }

        let key = self.entries.insert(PooledResource {
            resource,
            descriptor: descriptor.clone(),
            usage: UsageClass::Retained,
            created_frame: self.frame,
            last_used_frame: self.frame,
            idle_frames: 0,
            checked_out: false,
            used: true,
            ref_count: 1,
        });
        self.shared.insert(name.to_owned(), key);
        self.by_resource.insert(resource, key);
        self.stats.created += 1;
        log::debug!("ResourceCache: created shared resource '{name}'");
        Ok(resource)
    }

    /// Drops one holder of a shared resource; the last holder destroys it.
    ///
    /// Returns the remaining holder count.
    pub fn release_shared(&mut self, backend: &mut dyn GpuBackend, name: &str) -> Result<u32> {
        let key = *self
            .shared
            .get(name)
            .ok_or_else(|| FrameError::UnknownHandle(format!("shared resource '{name}'")))?;
        let remaining = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                entry.ref_count
            }
            None => 0,
        };
        if remaining == 0 {
            self.shared.remove(name);
            self.destroy_entry(backend, key);
        }
        Ok(remaining)
    }

    #[must_use]
    pub fn shared_ref_count(&self, name: &str) -> u32 {
        self.shared
            .get(name)
            .and_then(|key| self.entries.get(*key))
            .map_or(0, |e| e.ref_count)
    }

    // ========================================================================
    // Disposal & stats
    // ========================================================================

    /// Force-destroys every entry, shared ones included.
    pub fn dispose(&mut self, backend: &mut dyn GpuBackend) {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            destroy_resource(backend, entry.resource);
        }
        self.stats.destroyed += count as u64;
        self.pools.clear();
        self.by_resource.clear();
        self.shared.clear();
        log::debug!("ResourceCache: disposed {count} resources");
    }

    #[must_use]
    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            live: self.entries.len(),
            in_use: self.entries.values().filter(|e| e.checked_out).count(),
            ..self.stats
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn destroy_entry(&mut self, backend: &mut dyn GpuBackend, key: ResourceKey) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        let pool_key = PoolKey {
            descriptor: entry.descriptor,
            usage: entry.usage,
        };
        if let Some(keys) = self.pools.get_mut(&pool_key) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.pools.remove(&pool_key);
            }
        }
        self.by_resource.remove(&entry.resource);
        destroy_resource(backend, entry.resource);
        self.stats.destroyed += 1;
        log::trace!(
            "ResourceCache: destroyed {} (last used in frame {})",
            pool_key.descriptor,
            entry.last_used_frame
        );
    }
}

fn expect_kind<T>(value: Option<T>, kind: &str) -> Result<T> {
    value.ok_or_else(|| FrameError::UnknownHandle(format!("pooled entry is not a {kind}")))
}

fn exhausted(descriptor: &ResourceDescriptor, e: BackendError) -> FrameError {
    FrameError::ResourceExhausted {
        descriptor: descriptor.to_string(),
        message: e.0,
    }
}

/// Creates the backend resource(s) of `descriptor`, rolling back partial
/// work when a later allocation fails.
fn create_resource(
    backend: &mut dyn GpuBackend,
    descriptor: &ResourceDescriptor,
) -> Result<GpuResource> {
    let label = descriptor.label();
    match descriptor.kind() {
        ResourceKind::Texture2D(desc) | ResourceKind::TextureCube(desc) => backend
            .create_texture(desc, label)
            .map(GpuResource::Texture)
            .map_err(|e| exhausted(descriptor, e)),
        ResourceKind::Framebuffer(desc) => backend
            .create_framebuffer(desc, label)
            .map(GpuResource::Framebuffer)
            .map_err(|e| exhausted(descriptor, e)),
        ResourceKind::Buffer(desc) => backend
            .create_buffer(desc, label)
            .map(GpuResource::Buffer)
            .map_err(|e| exhausted(descriptor, e)),
        ResourceKind::Pass(desc) => {
            let color = backend
                .create_texture(&desc.color_desc(), label)
                .map_err(|e| exhausted(descriptor, e))?;

            let depth = match desc.depth_desc() {
                Some(depth_desc) => match backend.create_texture(&depth_desc, label) {
                    Ok(depth) => Some(depth),
                    Err(e) => {
                        backend.destroy_texture(color);
                        return Err(exhausted(descriptor, e));
                    }
                },
                None => None,
            };

            let mut fb_desc = FramebufferDesc::color(color);
            fb_desc.depth = depth;
            match backend.create_framebuffer(&fb_desc, label) {
                Ok(framebuffer) => Ok(GpuResource::Pass(PassTarget {
                    framebuffer,
                    color,
                    depth,
                    size: desc.size(),
                })),
                Err(e) => {
                    backend.destroy_texture(color);
                    if let Some(depth) = depth {
                        backend.destroy_texture(depth);
                    }
                    Err(exhausted(descriptor, e))
                }
            }
        }
    }
}

fn destroy_resource(backend: &mut dyn GpuBackend, resource: GpuResource) {
    match resource {
        GpuResource::Texture(t) => backend.destroy_texture(t),
        GpuResource::Framebuffer(f) => backend.destroy_framebuffer(f),
        GpuResource::Buffer(b) => backend.destroy_buffer(b),
        GpuResource::Pass(p) => {
            backend.destroy_framebuffer(p.framebuffer);
            backend.destroy_texture(p.color);
            if let Some(depth) = p.depth {
                backend.destroy_texture(depth);
            }
        }
    }
}
