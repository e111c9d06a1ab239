mod block;
mod increment;
mod materialize;
