mod offline_replay_test;
mod presence_test;
mod rest_backend_test;
mod restart_test;
