pub mod cdc_error;
