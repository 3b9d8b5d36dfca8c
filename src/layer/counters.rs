//! Aggregate portion counters.
//!
//! Counters are the primary short-circuit for render-pass dispatch: a
//! layer with zero visible portions skips every pass without touching its
//! portions. Fields are private and move only through the add/remove
//! methods, so a counter can never drift by direct mutation.

use paste::paste;

use super::flags::EntityFlags;

macro_rules! aggregate_counters {
    ($($field:ident => $flag:ident),* $(,)?) => {
        paste! {
            /// Per-layer portion counts, mirrored in aggregate on the model.
            #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
            pub struct AggregateCounters {
                num_portions: u32,
                num_transparent: u32,
                $( [<num_ $field>]: u32, )*
            }

            impl AggregateCounters {
                $(
                    #[must_use]
                    pub fn [<num_ $field>](&self) -> u32 {
                        self.[<num_ $field>]
                    }

                    pub fn [<add_ $field>](&mut self) {
                        self.[<num_ $field>] += 1;
                    }

                    pub fn [<remove_ $field>](&mut self) {
                        debug_assert!(self.[<num_ $field>] > 0);
                        self.[<num_ $field>] -= 1;
                    }
                )*

                /// Applies the counter delta for one portion's flag change.
                pub fn apply_flag_delta(&mut self, old: EntityFlags, new: EntityFlags) {
                    let changed = old ^ new;
                    $(
                        if changed.contains(EntityFlags::$flag) {
                            if new.contains(EntityFlags::$flag) {
                                self.[<add_ $field>]();
                            } else {
                                self.[<remove_ $field>]();
                            }
                        }
                    )*
                }

                /// Folds another counter set into this one (model mirroring).
                pub fn accumulate(&mut self, other: &AggregateCounters) {
                    self.num_portions += other.num_portions;
                    self.num_transparent += other.num_transparent;
                    $( self.[<num_ $field>] += other.[<num_ $field>]; )*
                }
            }
        }
    };
}

aggregate_counters!(
    visible => VISIBLE,
    culled => CULLED,
    pickable => PICKABLE,
    clippable => CLIPPABLE,
    edges => EDGES,
    xrayed => XRAYED,
    highlighted => HIGHLIGHTED,
    selected => SELECTED,
);

impl AggregateCounters {
    #[must_use]
    pub fn num_portions(&self) -> u32 {
        self.num_portions
    }

    #[must_use]
    pub fn num_transparent(&self) -> u32 {
        self.num_transparent
    }

    pub fn add_portion(&mut self) {
        self.num_portions += 1;
    }

    pub fn add_transparent(&mut self) {
        self.num_transparent += 1;
    }

    pub fn remove_transparent(&mut self) {
        debug_assert!(self.num_transparent > 0);
        self.num_transparent -= 1;
    }
}
