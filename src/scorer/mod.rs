pub mod rank_recompute;
