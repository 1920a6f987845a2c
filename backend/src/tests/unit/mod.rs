// Unit tests spanning several workflow components
mod delivery;
mod evaluation;
