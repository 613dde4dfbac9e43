//! Size Estimator Module
//!
//! Estimates the memory footprint of stored values. The figure is a heuristic
//! used to drive the watermarks, not an exact allocator measurement.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::mem::size_of;
use std::rc::{self, Rc};
use std::sync::{self, Arc};

// == Size Context ==
/// Per-estimate traversal state.
///
/// Records the addresses of shared allocations already counted so that a
/// pointee reachable through several `Rc`/`Arc` handles, including through a
/// reference cycle, contributes once.
#[derive(Debug, Default)]
pub struct SizeContext {
    visited: HashSet<usize>,
}

impl SizeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `ptr` is seen in this traversal.
    pub fn first_visit<T: ?Sized>(&mut self, ptr: *const T) -> bool {
        self.visited.insert(ptr as *const () as usize)
    }
}

// == Deep Size Trait ==
/// Values whose footprint can be estimated by the cache.
///
/// Implementors only provide [`DeepSize::heap_size`], the bytes owned outside
/// the value's inline representation. Composite types sum the `heap_size` of
/// their parts and add the inline size of any storage they allocate.
///
/// ```
/// use lru_cache::cache::{DeepSize, SizeContext};
///
/// struct Session {
///     user: String,
///     roles: Vec<String>,
/// }
///
/// impl DeepSize for Session {
///     fn heap_size(&self, ctx: &mut SizeContext) -> usize {
///         self.user.heap_size(ctx) + self.roles.heap_size(ctx)
///     }
/// }
///
/// let session = Session { user: "ann".into(), roles: vec!["admin".into()] };
/// assert!(session.deep_size() >= std::mem::size_of::<Session>() + 8);
/// ```
pub trait DeepSize {
    /// Bytes owned by `self` beyond `size_of_val(self)`.
    fn heap_size(&self, ctx: &mut SizeContext) -> usize;

    /// Inline size plus owned heap bytes, sharing `ctx` with the caller.
    fn deep_size_with(&self, ctx: &mut SizeContext) -> usize
    where
        Self: Sized,
    {
        size_of::<Self>() + self.heap_size(ctx)
    }

    /// Estimated total footprint, with a fresh visited-set.
    fn deep_size(&self) -> usize
    where
        Self: Sized,
    {
        self.deep_size_with(&mut SizeContext::new())
    }
}

macro_rules! inline_only {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DeepSize for $ty {
                #[inline]
                fn heap_size(&self, _ctx: &mut SizeContext) -> usize {
                    0
                }
            }
        )*
    };
}

inline_only!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    &'static str,
);

impl DeepSize for String {
    fn heap_size(&self, _ctx: &mut SizeContext) -> usize {
        self.capacity()
    }
}

impl DeepSize for Box<str> {
    fn heap_size(&self, _ctx: &mut SizeContext) -> usize {
        self.len()
    }
}

// == Sequences ==
fn elements_heap<'a, T: DeepSize + 'a>(
    items: impl IntoIterator<Item = &'a T>,
    ctx: &mut SizeContext,
) -> usize {
    items.into_iter().map(|item| item.heap_size(ctx)).sum()
}

impl<T: DeepSize> DeepSize for Vec<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        // Spare capacity is allocated too.
        self.capacity() * size_of::<T>() + elements_heap(self, ctx)
    }
}

impl<T: DeepSize> DeepSize for VecDeque<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.capacity() * size_of::<T>() + elements_heap(self, ctx)
    }
}

impl<T: DeepSize> DeepSize for Box<[T]> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.len() * size_of::<T>() + elements_heap(self.iter(), ctx)
    }
}

impl<T: DeepSize, const N: usize> DeepSize for [T; N] {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        elements_heap(self, ctx)
    }
}

impl<T: DeepSize> DeepSize for Option<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.as_ref().map_or(0, |value| value.heap_size(ctx))
    }
}

// == Mappings ==
impl<K: DeepSize, V: DeepSize, S> DeepSize for HashMap<K, V, S> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        let slots = self.capacity() * (size_of::<K>() + size_of::<V>());
        self.iter()
            .fold(slots, |acc, (k, v)| acc + k.heap_size(ctx) + v.heap_size(ctx))
    }
}

impl<K: DeepSize, V: DeepSize> DeepSize for BTreeMap<K, V> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        let slots = self.len() * (size_of::<K>() + size_of::<V>());
        self.iter()
            .fold(slots, |acc, (k, v)| acc + k.heap_size(ctx) + v.heap_size(ctx))
    }
}

impl<T: DeepSize, S> DeepSize for HashSet<T, S> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.capacity() * size_of::<T>() + elements_heap(self, ctx)
    }
}

impl<T: DeepSize> DeepSize for BTreeSet<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.len() * size_of::<T>() + elements_heap(self, ctx)
    }
}

// == References ==
impl<T: DeepSize> DeepSize for Box<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        (**self).deep_size_with(ctx)
    }
}

/// Strong and weak counters stored next to every `Rc`/`Arc` pointee.
const REFCOUNT_HEADER: usize = 2 * size_of::<usize>();

impl<T: DeepSize> DeepSize for Rc<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        if ctx.first_visit(Rc::as_ptr(self)) {
            REFCOUNT_HEADER + (**self).deep_size_with(ctx)
        } else {
            0
        }
    }
}

impl<T: DeepSize> DeepSize for Arc<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        if ctx.first_visit(Arc::as_ptr(self)) {
            REFCOUNT_HEADER + (**self).deep_size_with(ctx)
        } else {
            0
        }
    }
}

// Weak handles do not own their pointee.
impl<T> DeepSize for rc::Weak<T> {
    fn heap_size(&self, _ctx: &mut SizeContext) -> usize {
        0
    }
}

impl<T> DeepSize for sync::Weak<T> {
    fn heap_size(&self, _ctx: &mut SizeContext) -> usize {
        0
    }
}

// == Interior mutability ==
impl<T: DeepSize> DeepSize for RefCell<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        // Mutably borrowed elsewhere: count the shallow part only.
        self.try_borrow().map_or(0, |inner| inner.heap_size(ctx))
    }
}

impl<T: DeepSize + Copy> DeepSize for Cell<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.get().heap_size(ctx)
    }
}

impl<T: DeepSize> DeepSize for parking_lot::Mutex<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.try_lock().map_or(0, |inner| inner.heap_size(ctx))
    }
}

impl<T: DeepSize> DeepSize for parking_lot::RwLock<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.try_read().map_or(0, |inner| inner.heap_size(ctx))
    }
}

// == Tuples ==
macro_rules! tuple_heap {
    ($($name:ident),+) => {
        impl<$($name: DeepSize),+> DeepSize for ($($name,)+) {
            #[allow(non_snake_case)]
            fn heap_size(&self, ctx: &mut SizeContext) -> usize {
                let ($($name,)+) = self;
                0 $(+ $name.heap_size(ctx))+
            }
        }
    };
}

tuple_heap!(A);
tuple_heap!(A, B);
tuple_heap!(A, B, C);
tuple_heap!(A, B, C, D);

// == Dynamic values ==
impl DeepSize for serde_json::Value {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        use serde_json::Value;

        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) => 0,
            Value::String(s) => s.heap_size(ctx),
            Value::Array(items) => items.heap_size(ctx),
            Value::Object(map) => {
                let slots = map.len() * (size_of::<String>() + size_of::<Value>());
                map.iter()
                    .fold(slots, |acc, (k, v)| acc + k.heap_size(ctx) + v.heap_size(ctx))
            }
        }
    }
}
