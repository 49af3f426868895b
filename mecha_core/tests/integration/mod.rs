mod closed_loop;
mod scheduler_isolation;
mod startup_sequence;
mod supervised_rig;
