//! Stable arena IDs. A connection, job, or function is addressed by one
//! of these opaque indices rather than by a pointer, so cross-references
//! (worker <-> job, job <-> subscriber,
//! connection <-> function binding) are trivially expressible without the
//! intrusive-linked-list bookkeeping the original C server used.

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub usize);

        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                $name(v)
            }
        }

        impl From<$name> for usize {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

arena_id!(ConnectionId);
arena_id!(JobId);
arena_id!(FunctionId);
