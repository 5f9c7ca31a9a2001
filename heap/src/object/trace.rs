use std::cell::RefCell;
use std::collections::VecDeque;

use super::core::{AnyEdge, GcEdge};
use super::header::GcHeader;

/// A `TracerFn` is a callback invoked for each counted edge held by a payload.
pub type TracerFn<'a> = dyn FnMut(&GcHeader) + 'a;

/// use `trace()` to call on all owned counted edges
///
/// # Safety
///
/// see `trace()`'s requirement
pub unsafe trait Trace {
    /// call tracer_fn for every node the payload holds a [`GcEdge`] or [`AnyEdge`] to
    ///
    /// # Safety
    ///
    /// Every owned edge must be passed to `tracer_fn` **exactly once**. A missed edge lets the
    /// mark phase treat its target as garbage, which later surfaces as a fatal error when the
    /// edge is used.
    ///
    /// _**DO NOT**_ clone an edge inside `trace()`, that changes reference counts in the middle
    /// of a collection.
    fn trace(&self, tracer_fn: &mut TracerFn);
}

unsafe impl<T: Trace + 'static> Trace for GcEdge<T> {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        tracer_fn(self.header())
    }
}

unsafe impl Trace for AnyEdge {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        tracer_fn(self.header())
    }
}

unsafe impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        if let Some(v) = self {
            v.trace(tracer_fn);
        }
    }
}

unsafe impl<T: Trace> Trace for [T] {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        for elem in self {
            elem.trace(tracer_fn);
        }
    }
}

unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        self.as_slice().trace(tracer_fn)
    }
}

unsafe impl<T: Trace> Trace for Vec<T> {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        self.as_slice().trace(tracer_fn)
    }
}

unsafe impl<T: Trace> Trace for VecDeque<T> {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        for elem in self {
            elem.trace(tracer_fn);
        }
    }
}

unsafe impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        (**self).trace(tracer_fn)
    }
}

unsafe impl<T: Trace> Trace for RefCell<T> {
    #[inline]
    fn trace(&self, tracer_fn: &mut TracerFn) {
        // a payload mutably borrowed across an allocation can't be traced; its edges
        // stay counted, so the worst outcome is retention until the next collection
        match self.try_borrow() {
            Ok(inner) => inner.trace(tracer_fn),
            Err(_) => error!(
                "{} is mutably borrowed while being traced, its edges are skipped",
                std::any::type_name::<Self>()
            ),
        }
    }
}

macro_rules! trace_tuple {
    ($(($NAME: ident, $NUM: tt)),*) => {
        unsafe impl<$($NAME: Trace),*> Trace for ($($NAME),*) {
            #[inline]
            fn trace(&self, tracer_fn: &mut TracerFn) {
                $(
                    self.$NUM.trace(tracer_fn);
                )*
            }
        }
    };
}

trace_tuple!((A, 0), (B, 1));
trace_tuple!((A, 0), (B, 1), (C, 2));
trace_tuple!((A, 0), (B, 1), (C, 2), (D, 3));

macro_rules! trace_nothing {
    ($($ty: ty),* $(,)?) => {
        $(
            unsafe impl Trace for $ty {
                #[inline]
                fn trace(&self, _tracer_fn: &mut TracerFn) {}
            }
        )*
    };
}

trace_nothing!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
);
